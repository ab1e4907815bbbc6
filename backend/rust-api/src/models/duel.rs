use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{AnswerId, DuelMatchId, QuestionId, UserId};
use crate::models::question::Question;
use crate::models::rating::{mmr_delta, MatchOutcome};

pub const QUESTIONS_PER_DUEL: usize = 7;
pub const TIME_PER_QUESTION_SECS: u32 = 10;
pub const BASE_POINTS: u32 = 100;
pub const MIN_ANSWER_TIME_MS: i64 = 500;
pub const ROUND_GRACE_SECS: u32 = 2;
pub const COUNTDOWN_SECS: u32 = 3;
pub const INTERMISSION_SECS: u32 = 2;
pub const RECONNECT_WINDOW_SECS: u32 = 30;
pub const REMATCH_WINDOW_SECS: i64 = 300;
/// Both players must have shown up this long after the match was created.
pub const READY_DEADLINE_SECS: i64 = 60;

/// `round(BASE × max(0.5, 1 − t / limit))` for a correct answer.
pub fn duel_points(time_taken_ms: i64, time_limit_secs: u32) -> u32 {
    let limit_ms = f64::from(time_limit_secs) * 1000.0;
    let factor = (1.0 - time_taken_ms as f64 / limit_ms).max(0.5);
    (f64::from(BASE_POINTS) * factor).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    PendingReady,
    InProgress,
    Completed,
    Abandoned,
}

const DUEL_TRANSITIONS: &[(DuelStatus, &[DuelStatus])] = &[
    (
        DuelStatus::PendingReady,
        &[DuelStatus::InProgress, DuelStatus::Abandoned],
    ),
    (
        DuelStatus::InProgress,
        &[DuelStatus::Completed, DuelStatus::Abandoned],
    ),
    (DuelStatus::Completed, &[]),
    (DuelStatus::Abandoned, &[]),
];

impl DuelStatus {
    fn allowed(&self) -> &'static [DuelStatus] {
        DUEL_TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_transition_to(&self, target: DuelStatus) -> bool {
        self.allowed().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuelStatus::PendingReady => "pending_ready",
            DuelStatus::InProgress => "in_progress",
            DuelStatus::Completed => "completed",
            DuelStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundAnswer {
    pub round: u32,
    pub player_id: UserId,
    /// `None` when the round timer expired first.
    pub answer_id: Option<AnswerId>,
    pub time_taken_ms: i64,
    pub is_correct: bool,
    pub points_earned: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmrDelta {
    pub player1: i32,
    pub player2: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub round: u32,
    pub timed_out: bool,
    pub player1_points: u32,
    pub player2_points: u32,
    pub is_last: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelMatch {
    #[serde(rename = "_id")]
    id: DuelMatchId,
    player1_id: UserId,
    player2_id: UserId,
    question_ids: Vec<QuestionId>,
    round_answers: Vec<RoundAnswer>,
    player1_score: u32,
    player2_score: u32,
    status: DuelStatus,
    current_round: u32,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    winner_id: Option<UserId>,
    mmr_delta: Option<MmrDelta>,
    forfeited_by: Option<UserId>,
    rematch_of: Option<DuelMatchId>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl DuelMatch {
    pub fn new(
        player1_id: UserId,
        player2_id: UserId,
        question_ids: Vec<QuestionId>,
        now: i64,
    ) -> DomainResult<Self> {
        if player1_id == player2_id {
            return Err(DomainError::invalid("a duel needs two different players"));
        }
        if question_ids.len() != QUESTIONS_PER_DUEL {
            return Err(DomainError::invalid(format!(
                "a duel needs exactly {} questions",
                QUESTIONS_PER_DUEL
            )));
        }
        let id = DuelMatchId::new();
        let events = vec![DomainEvent::DuelMatchCreated {
            match_id: id,
            player1_id: player1_id.clone(),
            player2_id: player2_id.clone(),
            at: now,
        }];
        Ok(Self {
            id,
            player1_id,
            player2_id,
            question_ids,
            round_answers: Vec::new(),
            player1_score: 0,
            player2_score: 0,
            status: DuelStatus::PendingReady,
            current_round: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
            winner_id: None,
            mmr_delta: None,
            forfeited_by: None,
            rematch_of: None,
            events,
        })
    }

    pub fn with_rematch_of(mut self, previous: DuelMatchId) -> Self {
        self.rematch_of = Some(previous);
        self
    }

    fn transition(&mut self, target: DuelStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::state(format!(
                "cannot move duel from {} to {}",
                self.status.as_str(),
                target.as_str()
            )));
        }
        self.status = target;
        Ok(())
    }

    pub fn is_participant(&self, player_id: &UserId) -> bool {
        &self.player1_id == player_id || &self.player2_id == player_id
    }

    pub fn opponent_of(&self, player_id: &UserId) -> Option<&UserId> {
        if &self.player1_id == player_id {
            Some(&self.player2_id)
        } else if &self.player2_id == player_id {
            Some(&self.player1_id)
        } else {
            None
        }
    }

    pub fn total_rounds(&self) -> u32 {
        self.question_ids.len() as u32
    }

    pub fn question_id_for(&self, round: u32) -> Option<QuestionId> {
        round
            .checked_sub(1)
            .and_then(|i| self.question_ids.get(i as usize))
            .copied()
    }

    /// Starts round 1 once both players are ready.
    pub fn start(&mut self, now: i64) -> DomainResult<()> {
        self.transition(DuelStatus::InProgress)?;
        self.current_round = 1;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn answer_for(&self, round: u32, player_id: &UserId) -> Option<&RoundAnswer> {
        self.round_answers
            .iter()
            .find(|a| a.round == round && &a.player_id == player_id)
    }

    pub fn both_answered(&self, round: u32) -> bool {
        self.answer_for(round, &self.player1_id).is_some()
            && self.answer_for(round, &self.player2_id).is_some()
    }

    fn add_points(&mut self, player_id: &UserId, points: u32) {
        if player_id == &self.player1_id {
            self.player1_score += points;
        } else {
            self.player2_score += points;
        }
    }

    pub fn submit_answer(
        &mut self,
        player_id: &UserId,
        round: u32,
        question: &Question,
        answer_id: AnswerId,
        time_taken_ms: i64,
    ) -> DomainResult<RoundAnswer> {
        if self.status != DuelStatus::InProgress {
            return Err(DomainError::state(format!("duel is {}", self.status.as_str())));
        }
        if !self.is_participant(player_id) {
            return Err(DomainError::unauthorized("player is not part of this duel"));
        }
        if round != self.current_round {
            return Err(DomainError::state(format!(
                "round {} is not the current round",
                round
            )));
        }
        if self.question_id_for(round) != Some(question.id()) {
            return Err(DomainError::invalid("question does not belong to this round"));
        }
        if self.answer_for(round, player_id).is_some() {
            return Err(DomainError::conflict("answer already submitted for this round"));
        }
        let max_ms = i64::from(TIME_PER_QUESTION_SECS + ROUND_GRACE_SECS) * 1000;
        if !(MIN_ANSWER_TIME_MS..=max_ms).contains(&time_taken_ms) {
            return Err(DomainError::invalid(format!(
                "time taken must be between {} and {} ms",
                MIN_ANSWER_TIME_MS, max_ms
            )));
        }
        let answer = question
            .answer(&answer_id)
            .ok_or_else(|| DomainError::invalid("answer does not belong to the question"))?;

        let is_correct = answer.is_correct();
        let points_earned = if is_correct {
            duel_points(time_taken_ms, TIME_PER_QUESTION_SECS)
        } else {
            0
        };
        let record = RoundAnswer {
            round,
            player_id: player_id.clone(),
            answer_id: Some(answer_id),
            time_taken_ms,
            is_correct,
            points_earned,
        };
        self.add_points(player_id, points_earned);
        self.round_answers.push(record.clone());
        Ok(record)
    }

    /// Closes the current round; players without an answer get zero points.
    pub fn complete_round(&mut self, round: u32, now: i64) -> DomainResult<RoundSummary> {
        if self.status != DuelStatus::InProgress || round != self.current_round {
            return Err(DomainError::state(format!("round {} is not open", round)));
        }
        let mut timed_out = false;
        for player in [self.player1_id.clone(), self.player2_id.clone()] {
            if self.answer_for(round, &player).is_none() {
                timed_out = true;
                self.round_answers.push(RoundAnswer {
                    round,
                    player_id: player,
                    answer_id: None,
                    time_taken_ms: i64::from(TIME_PER_QUESTION_SECS) * 1000,
                    is_correct: false,
                    points_earned: 0,
                });
            }
        }
        let points = |player: &UserId| {
            self.answer_for(round, player)
                .map(|a| a.points_earned)
                .unwrap_or(0)
        };
        let summary = RoundSummary {
            round,
            timed_out,
            player1_points: points(&self.player1_id),
            player2_points: points(&self.player2_id),
            is_last: round >= self.total_rounds(),
        };
        self.events.push(DomainEvent::DuelRoundCompleted {
            match_id: self.id,
            round,
            player1_points: summary.player1_points,
            player2_points: summary.player2_points,
            timed_out,
            at: now,
        });
        if !summary.is_last {
            self.current_round += 1;
        }
        Ok(summary)
    }

    fn outcomes(&self) -> (MatchOutcome, MatchOutcome) {
        use std::cmp::Ordering;
        match self.player1_score.cmp(&self.player2_score) {
            Ordering::Greater => (MatchOutcome::Win, MatchOutcome::Loss),
            Ordering::Less => (MatchOutcome::Loss, MatchOutcome::Win),
            Ordering::Equal => (MatchOutcome::Draw, MatchOutcome::Draw),
        }
    }

    fn settle(
        &mut self,
        outcomes: (MatchOutcome, MatchOutcome),
        mmr1: i32,
        mmr2: i32,
        now: i64,
    ) -> DomainResult<(MatchOutcome, MatchOutcome)> {
        self.transition(DuelStatus::Completed)?;
        self.winner_id = match outcomes.0 {
            MatchOutcome::Win => Some(self.player1_id.clone()),
            MatchOutcome::Loss => Some(self.player2_id.clone()),
            MatchOutcome::Draw => None,
        };
        let delta = MmrDelta {
            player1: mmr_delta(mmr1, mmr2, outcomes.0.score()),
            player2: mmr_delta(mmr2, mmr1, outcomes.1.score()),
        };
        self.mmr_delta = Some(delta);
        self.finished_at = Some(now);
        self.events.push(DomainEvent::DuelMatchCompleted {
            match_id: self.id,
            winner_id: self.winner_id.clone(),
            player1_score: self.player1_score,
            player2_score: self.player2_score,
            player1_mmr_delta: delta.player1,
            player2_mmr_delta: delta.player2,
            forfeited_by: self.forfeited_by.clone(),
            at: now,
        });
        Ok(outcomes)
    }

    /// Settles the match after the last round. Draws leave `winner_id` empty.
    pub fn finish(&mut self, mmr1: i32, mmr2: i32, now: i64) -> DomainResult<(MatchOutcome, MatchOutcome)> {
        let outcomes = self.outcomes();
        self.settle(outcomes, mmr1, mmr2, now)
    }

    /// The absent or quitting player loses regardless of score.
    pub fn forfeit(
        &mut self,
        loser: &UserId,
        mmr1: i32,
        mmr2: i32,
        now: i64,
    ) -> DomainResult<(MatchOutcome, MatchOutcome)> {
        if !self.is_participant(loser) {
            return Err(DomainError::unauthorized("player is not part of this duel"));
        }
        self.forfeited_by = Some(loser.clone());
        let outcomes = if loser == &self.player1_id {
            (MatchOutcome::Loss, MatchOutcome::Win)
        } else {
            (MatchOutcome::Win, MatchOutcome::Loss)
        };
        self.settle(outcomes, mmr1, mmr2, now)
    }

    /// Frees the match without rating changes.
    pub fn abandon(&mut self, now: i64) -> DomainResult<()> {
        self.transition(DuelStatus::Abandoned)?;
        self.finished_at = Some(now);
        self.events.push(DomainEvent::DuelMatchAbandoned {
            match_id: self.id,
            at: now,
        });
        Ok(())
    }

    /// A `pending_ready` match nobody started in time.
    pub fn ready_expired(&self, now: i64) -> bool {
        self.status == DuelStatus::PendingReady && now - self.created_at >= READY_DEADLINE_SECS
    }

    pub fn can_rematch(&self, now: i64) -> bool {
        self.status == DuelStatus::Completed
            && self
                .finished_at
                .is_some_and(|finished| now - finished <= REMATCH_WINDOW_SECS)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> DuelMatchId {
        self.id
    }

    pub fn player1_id(&self) -> &UserId {
        &self.player1_id
    }

    pub fn player2_id(&self) -> &UserId {
        &self.player2_id
    }

    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    pub fn round_answers(&self) -> &[RoundAnswer] {
        &self.round_answers
    }

    pub fn player1_score(&self) -> u32 {
        self.player1_score
    }

    pub fn player2_score(&self) -> u32 {
        self.player2_score
    }

    pub fn score_of(&self, player_id: &UserId) -> u32 {
        if player_id == &self.player1_id {
            self.player1_score
        } else {
            self.player2_score
        }
    }

    pub fn status(&self) -> DuelStatus {
        self.status
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<i64> {
        self.finished_at
    }

    pub fn winner_id(&self) -> Option<&UserId> {
        self.winner_id.as_ref()
    }

    pub fn mmr_delta(&self) -> Option<MmrDelta> {
        self.mmr_delta
    }

    pub fn forfeited_by(&self) -> Option<&UserId> {
        self.forfeited_by.as_ref()
    }

    pub fn rematch_of(&self) -> Option<DuelMatchId> {
        self.rematch_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{fixtures, QuestionDifficulty};

    fn setup() -> (DuelMatch, Vec<Question>) {
        let questions: Vec<Question> = (0..QUESTIONS_PER_DUEL)
            .map(|_| fixtures::question(QuestionDifficulty::Medium))
            .collect();
        let mut duel = DuelMatch::new(
            UserId::from_platform(1),
            UserId::from_platform(2),
            questions.iter().map(|q| q.id()).collect(),
            0,
        )
        .unwrap();
        duel.start(3).unwrap();
        (duel, questions)
    }

    #[test]
    fn test_points_formula() {
        assert_eq!(duel_points(0, 10), 100);
        assert_eq!(duel_points(3_000, 10), 70);
        assert_eq!(duel_points(5_000, 10), 50);
        assert_eq!(duel_points(9_000, 10), 50);
    }

    #[test]
    fn test_answer_once_per_round() {
        let (mut duel, questions) = setup();
        let p1 = UserId::from_platform(1);
        let q = &questions[0];
        let first = duel
            .submit_answer(&p1, 1, q, fixtures::correct(q), 3_000)
            .unwrap();
        assert_eq!(first.points_earned, 70);
        assert!(matches!(
            duel.submit_answer(&p1, 1, q, fixtures::correct(q), 3_000),
            Err(DomainError::Conflict(_))
        ));
        assert_eq!(duel.player1_score(), 70);
    }

    #[test]
    fn test_answer_validation() {
        let (mut duel, questions) = setup();
        let p1 = UserId::from_platform(1);
        let q = &questions[0];
        assert!(matches!(
            duel.submit_answer(&p1, 1, q, fixtures::correct(q), 100),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            duel.submit_answer(&p1, 1, q, fixtures::correct(q), 450),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            duel.submit_answer(&UserId::from_platform(9), 1, q, fixtures::correct(q), 1_000),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(matches!(
            duel.submit_answer(&p1, 2, &questions[1], fixtures::correct(&questions[1]), 1_000),
            Err(DomainError::StateViolation(_))
        ));
    }

    #[test]
    fn test_timeout_gives_zero_and_advances() {
        let (mut duel, questions) = setup();
        let p1 = UserId::from_platform(1);
        let q = &questions[0];
        duel.submit_answer(&p1, 1, q, fixtures::correct(q), 3_000)
            .unwrap();
        let summary = duel.complete_round(1, 20).unwrap();
        assert!(summary.timed_out);
        assert_eq!(summary.player1_points, 70);
        assert_eq!(summary.player2_points, 0);
        assert_eq!(duel.current_round(), 2);
        assert!(duel.both_answered(1));
    }

    #[test]
    fn test_scores_equal_sum_of_round_points() {
        let (mut duel, questions) = setup();
        let p1 = UserId::from_platform(1);
        let p2 = UserId::from_platform(2);
        for (i, q) in questions.iter().enumerate() {
            let round = i as u32 + 1;
            duel.submit_answer(&p1, round, q, fixtures::correct(q), 1_000)
                .unwrap();
            duel.submit_answer(&p2, round, q, fixtures::wrong(q), 1_000)
                .unwrap();
            let summary = duel.complete_round(round, 10 + i as i64).unwrap();
            assert_eq!(summary.is_last, round == QUESTIONS_PER_DUEL as u32);
        }
        let sum: u32 = duel
            .round_answers()
            .iter()
            .filter(|a| a.player_id == p1)
            .map(|a| a.points_earned)
            .sum();
        assert_eq!(duel.player1_score(), sum);

        let (o1, o2) = duel.finish(1000, 1000, 100).unwrap();
        assert_eq!((o1, o2), (MatchOutcome::Win, MatchOutcome::Loss));
        assert_eq!(duel.winner_id(), Some(&p1));
        assert_eq!(
            duel.mmr_delta(),
            Some(MmrDelta {
                player1: 16,
                player2: -16
            })
        );
        assert!(duel.status().is_terminal());
        assert!(duel.can_rematch(100 + REMATCH_WINDOW_SECS));
        assert!(!duel.can_rematch(101 + REMATCH_WINDOW_SECS));
    }

    #[test]
    fn test_draw_has_no_winner() {
        let (mut duel, _) = setup();
        duel.finish(1000, 1000, 10).unwrap();
        assert_eq!(duel.winner_id(), None);
        assert_eq!(duel.mmr_delta().map(|d| d.player1), Some(0));
    }

    #[test]
    fn test_forfeit_and_abandon() {
        let (mut duel, _) = setup();
        duel.forfeit(&UserId::from_platform(1), 1000, 1000, 50).unwrap();
        assert_eq!(duel.winner_id(), Some(&UserId::from_platform(2)));
        assert_eq!(duel.forfeited_by(), Some(&UserId::from_platform(1)));
        assert!(duel.abandon(60).is_err());

        let (mut other, _) = setup();
        other.abandon(5).unwrap();
        assert_eq!(other.status(), DuelStatus::Abandoned);
        assert!(other.mmr_delta().is_none());
    }

    #[test]
    fn test_ready_deadline_only_applies_before_start() {
        let ids = (0..QUESTIONS_PER_DUEL).map(|_| QuestionId::new()).collect();
        let mut duel =
            DuelMatch::new(UserId::from_platform(1), UserId::from_platform(2), ids, 100).unwrap();
        assert!(!duel.ready_expired(100 + READY_DEADLINE_SECS - 1));
        assert!(duel.ready_expired(100 + READY_DEADLINE_SECS));

        duel.start(120).unwrap();
        assert!(!duel.ready_expired(100 + 10 * READY_DEADLINE_SECS));
    }
}
