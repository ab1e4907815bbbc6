use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{AnswerId, DailyGameId, DailyQuizId, QuestionId, UserId};
use crate::models::question::Question;
use crate::utils::time::day_start;

pub const DAILY_QUESTION_COUNT: usize = 10;
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_COST_COINS: u32 = 100;
pub const STREAK_MILESTONES: [u32; 5] = [7, 14, 30, 60, 100];
const SECONDS_PER_DAY: i64 = 86_400;

/// Frozen question set served to every player on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuiz {
    #[serde(rename = "_id")]
    pub id: DailyQuizId,
    pub date: NaiveDate,
    pub question_ids: Vec<QuestionId>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl DailyQuiz {
    pub fn new(date: NaiveDate, question_ids: Vec<QuestionId>, now: i64) -> DomainResult<Self> {
        if question_ids.len() != DAILY_QUESTION_COUNT {
            return Err(DomainError::invalid(format!(
                "a daily quiz needs exactly {} questions",
                DAILY_QUESTION_COUNT
            )));
        }
        let unique: HashSet<_> = question_ids.iter().collect();
        if unique.len() != question_ids.len() {
            return Err(DomainError::invalid("daily quiz questions must be distinct"));
        }
        Ok(Self {
            id: DailyQuizId::new(),
            date,
            question_ids,
            created_at: now,
            expires_at: day_start(date) + SECONDS_PER_DAY,
        })
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyGameStatus {
    InProgress,
    Completed,
}

const DAILY_TRANSITIONS: &[(DailyGameStatus, &[DailyGameStatus])] = &[
    (DailyGameStatus::InProgress, &[DailyGameStatus::Completed]),
    (DailyGameStatus::Completed, &[]),
];

impl DailyGameStatus {
    pub fn can_transition_to(&self, target: DailyGameStatus) -> bool {
        DAILY_TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .is_some_and(|(_, to)| to.contains(&target))
    }

    pub fn is_terminal(&self) -> bool {
        *self == DailyGameStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChestType {
    None,
    Bronze,
    Silver,
    Gold,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChestReward {
    pub chest_type: ChestType,
    pub coins: u32,
}

impl ChestReward {
    pub fn for_score(base_score: u32) -> Self {
        let (chest_type, coins) = match base_score {
            s if s >= 100 => (ChestType::Diamond, 200),
            s if s >= 90 => (ChestType::Gold, 100),
            s if s >= 70 => (ChestType::Silver, 60),
            s if s >= 40 => (ChestType::Bronze, 30),
            _ => (ChestType::None, 0),
        };
        Self { chest_type, coins }
    }
}

/// Multiplier applied to the base score for an active day streak.
pub fn streak_bonus(streak: u32) -> f64 {
    match streak {
        s if s >= 100 => 2.0,
        s if s >= 30 => 1.6,
        s if s >= 14 => 1.4,
        s if s >= 7 => 1.25,
        s if s >= 3 => 1.1,
        _ => 1.0,
    }
}

pub fn next_streak_milestone(streak: u32) -> Option<u32> {
    STREAK_MILESTONES.iter().copied().find(|m| *m > streak)
}

/// Day-streak bookkeeping carried from one completed attempt to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_played_date: Option<NaiveDate>,
}

impl StreakState {
    /// Streak after completing `date`, with milestones crossed on the way.
    pub fn advance(&self, date: NaiveDate) -> (Self, Vec<u32>) {
        let previous_day = date.checked_sub_days(Days::new(1));
        let current = match self.last_played_date {
            Some(last) if last == date => self.current_streak.max(1),
            Some(last) if Some(last) == previous_day => self.current_streak + 1,
            _ => 1,
        };
        let crossed = STREAK_MILESTONES
            .iter()
            .copied()
            .filter(|m| *m > self.current_streak && *m <= current)
            .collect();
        (
            Self {
                current_streak: current,
                best_streak: self.best_streak.max(current),
                last_played_date: Some(date),
            },
            crossed,
        )
    }

    /// Streak as seen on `today`: broken when neither today nor yesterday was played.
    pub fn as_of(&self, today: NaiveDate) -> u32 {
        let yesterday = today.checked_sub_days(Days::new(1));
        match self.last_played_date {
            Some(last) if last == today || Some(last) == yesterday => self.current_streak,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAnswer {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub is_correct: bool,
    pub points: u32,
    pub time_taken_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub base_score: u32,
    pub user_answers: Vec<DailyAnswer>,
    pub current_question_index: u32,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub question_started_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyGame {
    #[serde(rename = "_id")]
    id: DailyGameId,
    player_id: UserId,
    daily_quiz_id: DailyQuizId,
    date: NaiveDate,
    status: DailyGameStatus,
    attempt_number: u32,
    question_ids: Vec<QuestionId>,
    session: SessionState,
    streak: StreakState,
    chest: Option<ChestReward>,
    #[serde(default)]
    chest_opened: bool,
    rank: Option<u32>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl DailyGame {
    pub fn start(
        player_id: UserId,
        quiz: &DailyQuiz,
        streak: StreakState,
        now: i64,
    ) -> DomainResult<Self> {
        Self::start_attempt(player_id, quiz.id, quiz.date, quiz.question_ids.clone(), 1, streak, now)
    }

    fn start_attempt(
        player_id: UserId,
        daily_quiz_id: DailyQuizId,
        date: NaiveDate,
        question_ids: Vec<QuestionId>,
        attempt_number: u32,
        streak: StreakState,
        now: i64,
    ) -> DomainResult<Self> {
        if !(1..=MAX_ATTEMPTS).contains(&attempt_number) {
            return Err(DomainError::invalid(format!(
                "attempt number must be between 1 and {}",
                MAX_ATTEMPTS
            )));
        }
        let id = DailyGameId::new();
        let events = vec![DomainEvent::DailyGameStarted {
            game_id: id,
            player_id: player_id.clone(),
            date,
            attempt: attempt_number,
            at: now,
        }];
        Ok(Self {
            id,
            player_id,
            daily_quiz_id,
            date,
            status: DailyGameStatus::InProgress,
            attempt_number,
            question_ids,
            session: SessionState {
                base_score: 0,
                user_answers: Vec::new(),
                current_question_index: 0,
                started_at: now,
                finished_at: None,
                question_started_at: now,
            },
            streak,
            chest: None,
            chest_opened: false,
            rank: None,
            events,
        })
    }

    /// Next attempt on the same question set. The day streak is left as attempt 1 set it.
    pub fn retry(&self, now: i64) -> DomainResult<Self> {
        if !self.status.is_terminal() {
            return Err(DomainError::state("the current attempt is still in progress"));
        }
        if self.attempt_number >= MAX_ATTEMPTS {
            return Err(DomainError::exhausted("no attempts left today"));
        }
        Self::start_attempt(
            self.player_id.clone(),
            self.daily_quiz_id,
            self.date,
            self.question_ids.clone(),
            self.attempt_number + 1,
            self.streak,
            now,
        )
    }

    pub fn current_question_id(&self) -> Option<QuestionId> {
        self.question_ids
            .get(self.session.current_question_index as usize)
            .copied()
    }

    /// Stores an answer without revealing correctness to the player.
    pub fn submit_answer(
        &mut self,
        question: &Question,
        answer_id: AnswerId,
        time_taken_ms: i64,
        now: i64,
    ) -> DomainResult<bool> {
        if self.status != DailyGameStatus::InProgress {
            return Err(DomainError::state("daily game is already completed"));
        }
        if time_taken_ms < 0 {
            return Err(DomainError::invalid("time taken must not be negative"));
        }
        if self.current_question_id() != Some(question.id()) {
            return Err(DomainError::invalid("question is not the current question"));
        }
        let answer = question
            .answer(&answer_id)
            .ok_or_else(|| DomainError::invalid("answer does not belong to the question"))?;

        let is_correct = answer.is_correct();
        let points = if is_correct { question.points().value() } else { 0 };
        self.session.base_score += points;
        self.session.user_answers.push(DailyAnswer {
            question_id: question.id(),
            answer_id,
            is_correct,
            points,
            time_taken_ms,
        });
        self.session.current_question_index += 1;
        self.session.question_started_at = now;
        self.events.push(DomainEvent::DailyQuestionAnswered {
            game_id: self.id,
            player_id: self.player_id.clone(),
            question_id: question.id(),
            question_index: self.session.current_question_index,
            at: now,
        });

        if self.session.current_question_index as usize == self.question_ids.len() {
            self.complete(now)?;
        }
        Ok(self.status.is_terminal())
    }

    fn complete(&mut self, now: i64) -> DomainResult<()> {
        if !self.status.can_transition_to(DailyGameStatus::Completed) {
            return Err(DomainError::state("daily game cannot be completed"));
        }
        self.status = DailyGameStatus::Completed;
        self.session.finished_at = Some(now);
        let chest = ChestReward::for_score(self.session.base_score);
        self.chest = Some(chest);

        if self.attempt_number == 1 {
            let (streak, crossed) = self.streak.advance(self.date);
            self.streak = streak;
            for streak_days in crossed {
                self.events.push(DomainEvent::StreakMilestoneReached {
                    player_id: self.player_id.clone(),
                    streak_days,
                    at: now,
                });
            }
        }

        self.events.push(DomainEvent::DailyGameCompleted {
            game_id: self.id,
            player_id: self.player_id.clone(),
            date: self.date,
            attempt: self.attempt_number,
            base_score: self.session.base_score,
            chest: chest.chest_type,
            current_streak: self.streak.current_streak,
            at: now,
        });
        Ok(())
    }

    /// Returns the reward and whether this call opened the chest.
    pub fn open_chest(&mut self, now: i64) -> DomainResult<(ChestReward, bool)> {
        let chest = self
            .chest
            .ok_or_else(|| DomainError::state("chest is available after completing the challenge"))?;
        if self.chest_opened {
            return Ok((chest, false));
        }
        self.chest_opened = true;
        self.events.push(DomainEvent::ChestOpened {
            game_id: self.id,
            player_id: self.player_id.clone(),
            chest: chest.chest_type,
            coins: chest.coins,
            at: now,
        });
        Ok((chest, true))
    }

    pub fn final_score(&self) -> u32 {
        (f64::from(self.session.base_score) * streak_bonus(self.streak.current_streak)).floor() as u32
    }

    pub fn set_rank(&mut self, rank: u32) {
        self.rank = Some(rank);
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> DailyGameId {
        self.id
    }

    pub fn player_id(&self) -> &UserId {
        &self.player_id
    }

    pub fn daily_quiz_id(&self) -> DailyQuizId {
        self.daily_quiz_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn status(&self) -> DailyGameStatus {
        self.status
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn base_score(&self) -> u32 {
        self.session.base_score
    }

    pub fn finished_at(&self) -> Option<i64> {
        self.session.finished_at
    }

    pub fn streak(&self) -> StreakState {
        self.streak
    }

    pub fn chest(&self) -> Option<ChestReward> {
        self.chest
    }

    pub fn chest_opened(&self) -> bool {
        self.chest_opened
    }

    pub fn rank(&self) -> Option<u32> {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{fixtures, QuestionDifficulty};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn quiz_for(day: u32) -> (DailyQuiz, Vec<Question>) {
        let questions: Vec<Question> = (0..DAILY_QUESTION_COUNT)
            .map(|_| fixtures::question(QuestionDifficulty::Easy))
            .collect();
        let quiz = DailyQuiz::new(date(day), questions.iter().map(|q| q.id()).collect(), 0).unwrap();
        (quiz, questions)
    }

    fn play(game: &mut DailyGame, questions: &[Question], correct: usize) {
        for (i, q) in questions.iter().enumerate() {
            let answer = if i < correct {
                fixtures::correct(q)
            } else {
                fixtures::wrong(q)
            };
            game.submit_answer(q, answer, 1_000, 100 + i as i64).unwrap();
        }
    }

    #[test]
    fn test_daily_quiz_needs_ten_distinct_questions() {
        assert!(DailyQuiz::new(date(1), vec![QuestionId::new(); 10], 0).is_err());
        assert!(DailyQuiz::new(date(1), vec![QuestionId::new()], 0).is_err());
        let (quiz, _) = quiz_for(1);
        assert_eq!(quiz.expires_at, day_start(date(2)));
    }

    #[test]
    fn test_chest_buckets() {
        assert_eq!(ChestReward::for_score(39).chest_type, ChestType::None);
        assert_eq!(ChestReward::for_score(40).coins, 30);
        assert_eq!(ChestReward::for_score(70).chest_type, ChestType::Silver);
        assert_eq!(ChestReward::for_score(90).chest_type, ChestType::Gold);
        assert_eq!(ChestReward::for_score(100).coins, 200);
    }

    #[test]
    fn test_answers_follow_snapshot_order() {
        let (quiz, questions) = quiz_for(1);
        let mut game = DailyGame::start(UserId::from_platform(1), &quiz, StreakState::default(), 0).unwrap();
        let err = game
            .submit_answer(&questions[1], fixtures::correct(&questions[1]), 10, 1)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));

        play(&mut game, &questions, 7);
        assert_eq!(game.status(), DailyGameStatus::Completed);
        assert_eq!(game.session().current_question_index, 10);
        assert_eq!(game.base_score(), 70);
        assert_eq!(game.chest().map(|c| c.chest_type), Some(ChestType::Silver));
        assert!(game
            .submit_answer(&questions[0], fixtures::correct(&questions[0]), 10, 200)
            .is_err());
    }

    #[test]
    fn test_streak_rollover() {
        let player = UserId::from_platform(1);
        let six_days = StreakState {
            current_streak: 6,
            best_streak: 6,
            last_played_date: Some(date(10)),
        };

        let (quiz, questions) = quiz_for(11);
        let mut game = DailyGame::start(player.clone(), &quiz, six_days, 0).unwrap();
        play(&mut game, &questions, 5);
        assert_eq!(game.streak().current_streak, 7);
        assert!(game
            .take_events()
            .iter()
            .any(|e| matches!(e, DomainEvent::StreakMilestoneReached { streak_days: 7, .. })));

        let (quiz, questions) = quiz_for(13);
        let mut later = DailyGame::start(player, &quiz, game.streak(), 0).unwrap();
        play(&mut later, &questions, 5);
        assert_eq!(later.streak().current_streak, 1);
        assert_eq!(later.streak().best_streak, 7);
    }

    #[test]
    fn test_retry_keeps_streak_and_limits_attempts() {
        let (quiz, questions) = quiz_for(1);
        let mut first = DailyGame::start(UserId::from_platform(1), &quiz, StreakState::default(), 0).unwrap();
        assert!(first.retry(1).is_err());
        play(&mut first, &questions, 3);
        let streak = first.streak();

        let mut second = first.retry(300).unwrap();
        assert_eq!(second.attempt_number(), 2);
        play(&mut second, &questions, 10);
        assert_eq!(second.streak(), streak);

        let mut third = second.retry(600).unwrap();
        play(&mut third, &questions, 0);
        assert!(matches!(third.retry(900), Err(DomainError::ExhaustedResource(_))));
    }

    #[test]
    fn test_open_chest_is_idempotent() {
        let (quiz, questions) = quiz_for(1);
        let mut game = DailyGame::start(UserId::from_platform(1), &quiz, StreakState::default(), 0).unwrap();
        assert!(game.open_chest(1).is_err());
        play(&mut game, &questions, 9);
        let (first, opened) = game.open_chest(500).unwrap();
        let (second, opened_again) = game.open_chest(501).unwrap();
        assert_eq!(first, second);
        assert!(opened);
        assert!(!opened_again);
    }

    #[test]
    fn test_streak_bonus_table() {
        assert_eq!(streak_bonus(2), 1.0);
        assert_eq!(streak_bonus(3), 1.1);
        assert_eq!(streak_bonus(7), 1.25);
        assert_eq!(streak_bonus(30), 1.6);
        assert_eq!(streak_bonus(100), 2.0);
        assert_eq!(next_streak_milestone(7), Some(14));
        assert_eq!(next_streak_milestone(100), None);
    }
}
