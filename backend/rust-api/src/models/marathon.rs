use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{AnswerId, CategoryId, MarathonGameId, QuestionId, UserId};
use crate::models::marathon_systems::{
    AssistType, BonusInventory, BonusType, ContinueCostCalculator, DifficultyLevel,
    DifficultyProgression, HintType, HintsSystem, LivesSystem, TIME_BONUS_SECS,
};
use crate::models::question::Question;
use crate::models::user::PaymentMethod;

pub const RECENT_QUESTIONS_WINDOW: usize = 20;
pub const MAX_ANSWER_TIME_MS: i64 = 3_600_000;

/// Question pool a marathon draws from: the whole bank or one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CategoryScope {
    All,
    Category(CategoryId),
}

impl CategoryScope {
    pub fn parse(value: Option<&str>) -> DomainResult<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("all") => Ok(CategoryScope::All),
            Some(id) => Ok(CategoryScope::Category(CategoryId::parse(id)?)),
        }
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        match self {
            CategoryScope::All => None,
            CategoryScope::Category(id) => Some(*id),
        }
    }
}

impl fmt::Display for CategoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryScope::All => f.write_str("all"),
            CategoryScope::Category(id) => write!(f, "{}", id),
        }
    }
}

impl TryFrom<String> for CategoryScope {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(Some(&value))
    }
}

impl From<CategoryScope> for String {
    fn from(scope: CategoryScope) -> String {
        scope.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarathonStatus {
    InProgress,
    GameOver,
    Completed,
    Abandoned,
}

const MARATHON_TRANSITIONS: &[(MarathonStatus, &[MarathonStatus])] = &[
    (
        MarathonStatus::InProgress,
        &[MarathonStatus::GameOver, MarathonStatus::Abandoned],
    ),
    (
        MarathonStatus::GameOver,
        &[MarathonStatus::InProgress, MarathonStatus::Completed],
    ),
    (MarathonStatus::Completed, &[]),
    (MarathonStatus::Abandoned, &[]),
];

impl MarathonStatus {
    fn allowed(&self) -> &'static [MarathonStatus] {
        MARATHON_TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_transition_to(&self, target: MarathonStatus) -> bool {
        self.allowed().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarathonStatus::InProgress => "in_progress",
            MarathonStatus::GameOver => "game_over",
            MarathonStatus::Completed => "completed",
            MarathonStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistUsage {
    pub question_id: QuestionId,
    pub assist: AssistType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistEffect {
    FiftyFifty { removed_answer_ids: Vec<AnswerId> },
    ExtraTime { added_seconds: u32, time_limit: u32 },
    Skip { skipped_question_id: QuestionId },
    ShieldArmed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarathonAnswerOutcome {
    pub is_correct: bool,
    pub correct_answer_id: Option<AnswerId>,
    pub points_earned: u32,
    pub shield_consumed: bool,
    pub life_lost: bool,
    pub difficulty_changed: bool,
    pub game_over: bool,
    pub is_new_record: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonGame {
    #[serde(rename = "_id")]
    id: MarathonGameId,
    player_id: UserId,
    category: CategoryScope,
    status: MarathonStatus,
    started_at: i64,
    finished_at: Option<i64>,
    current_question: Option<Question>,
    question_loaded_at: Option<i64>,
    #[serde(default)]
    extra_seconds: u32,
    answered_question_ids: Vec<QuestionId>,
    recent_question_ids: VecDeque<QuestionId>,
    current_streak: u32,
    max_streak: u32,
    base_score: u32,
    lives: LivesSystem,
    hints: HintsSystem,
    bonuses: BonusInventory,
    difficulty: DifficultyProgression,
    personal_best_streak: Option<u32>,
    used_hints: Vec<AssistUsage>,
    #[serde(default)]
    shield_active: bool,
    continue_count: u32,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl MarathonGame {
    pub fn new(
        player_id: UserId,
        category: CategoryScope,
        personal_best_streak: Option<u32>,
        now: i64,
    ) -> DomainResult<Self> {
        let id = MarathonGameId::new();
        let mut game = Self {
            id,
            player_id,
            category,
            status: MarathonStatus::InProgress,
            started_at: now,
            finished_at: None,
            current_question: None,
            question_loaded_at: None,
            extra_seconds: 0,
            answered_question_ids: Vec::new(),
            recent_question_ids: VecDeque::with_capacity(RECENT_QUESTIONS_WINDOW + 1),
            current_streak: 0,
            max_streak: 0,
            base_score: 0,
            lives: LivesSystem::new(now),
            hints: HintsSystem::default(),
            bonuses: BonusInventory::default(),
            difficulty: DifficultyProgression::default(),
            personal_best_streak,
            used_hints: Vec::new(),
            shield_active: false,
            continue_count: 0,
            events: Vec::new(),
        };
        game.events.push(DomainEvent::MarathonGameStarted {
            game_id: id,
            player_id: game.player_id.clone(),
            category: game.category,
            at: now,
        });
        Ok(game)
    }

    /// Replaces the lives budget; used when hydrating saved state.
    pub fn with_lives(mut self, lives: LivesSystem) -> Self {
        self.lives = lives;
        self
    }

    pub fn ensure_in_progress(&self) -> DomainResult<()> {
        if self.status != MarathonStatus::InProgress {
            return Err(DomainError::state(format!(
                "marathon game is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn transition(&mut self, target: MarathonStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::state(format!(
                "cannot move marathon game from {} to {}",
                self.status.as_str(),
                target.as_str()
            )));
        }
        self.status = target;
        Ok(())
    }

    /// Installs the next question picked by the selector.
    pub fn load_question(&mut self, question: Question, now: i64) -> DomainResult<()> {
        self.ensure_in_progress()?;
        self.recent_question_ids.push_back(question.id());
        while self.recent_question_ids.len() > RECENT_QUESTIONS_WINDOW {
            self.recent_question_ids.pop_front();
        }
        self.current_question = Some(question);
        self.question_loaded_at = Some(now);
        self.extra_seconds = 0;
        Ok(())
    }

    fn ensure_current(&self, question_id: &QuestionId) -> DomainResult<&Question> {
        match &self.current_question {
            Some(q) if &q.id() == question_id => Ok(q),
            Some(_) => Err(DomainError::invalid("question is not the current question")),
            None => Err(DomainError::state("no question is loaded")),
        }
    }

    /// A missing `answer_id` is a client-side timeout and counts as incorrect.
    pub fn answer_question(
        &mut self,
        question_id: QuestionId,
        answer_id: Option<AnswerId>,
        time_taken_ms: i64,
        answered_at: i64,
    ) -> DomainResult<MarathonAnswerOutcome> {
        self.ensure_in_progress()?;
        self.lives = self.lives.regenerate(answered_at);
        if !self.lives.has_lives() {
            return Err(DomainError::exhausted("no lives left"));
        }
        if !(0..=MAX_ANSWER_TIME_MS).contains(&time_taken_ms) {
            return Err(DomainError::invalid(format!(
                "time taken must be between 0 and {} ms",
                MAX_ANSWER_TIME_MS
            )));
        }
        let question = self.ensure_current(&question_id)?;
        let is_correct = match answer_id {
            Some(id) => question
                .answer(&id)
                .ok_or_else(|| DomainError::invalid("answer does not belong to the question"))?
                .is_correct(),
            None => false,
        };
        let correct_answer_id = question.correct_answer_id();
        let points = question.points().value();

        let mut outcome = MarathonAnswerOutcome {
            is_correct,
            correct_answer_id,
            points_earned: 0,
            shield_consumed: false,
            life_lost: false,
            difficulty_changed: false,
            game_over: false,
            is_new_record: false,
        };

        if is_correct {
            self.current_streak += 1;
            self.max_streak = self.max_streak.max(self.current_streak);
            self.base_score += points;
            outcome.points_earned = points;

            let previous = self.difficulty.level();
            self.difficulty = self.difficulty.after_correct(self.current_streak);
            if self.difficulty.level() != previous {
                outcome.difficulty_changed = true;
                self.events.push(DomainEvent::DifficultyIncreased {
                    game_id: self.id,
                    player_id: self.player_id.clone(),
                    from: previous,
                    to: self.difficulty.level(),
                    streak: self.current_streak,
                    at: answered_at,
                });
            }
        } else if self.shield_active {
            self.shield_active = false;
            outcome.shield_consumed = true;
            self.events.push(DomainEvent::ShieldConsumed {
                game_id: self.id,
                player_id: self.player_id.clone(),
                question_id,
                at: answered_at,
            });
        } else {
            self.lives = self.lives.lose_life(answered_at);
            outcome.life_lost = true;
            self.events.push(DomainEvent::LifeLost {
                game_id: self.id,
                player_id: self.player_id.clone(),
                lives_remaining: self.lives.current_lives(),
                at: answered_at,
            });
            self.current_streak = 0;
            self.difficulty = self.difficulty.reset();

            if !self.lives.has_lives() {
                self.transition(MarathonStatus::GameOver)?;
                self.finished_at = Some(answered_at);
                let is_new_record = self.is_new_record();
                outcome.game_over = true;
                outcome.is_new_record = is_new_record;
                self.events.push(DomainEvent::MarathonGameOver {
                    game_id: self.id,
                    player_id: self.player_id.clone(),
                    max_streak: self.max_streak,
                    score: self.base_score,
                    is_new_record,
                    previous_record: self.personal_best_streak,
                    at: answered_at,
                });
            }
        }

        self.answered_question_ids.push(question_id);
        self.clear_current_question();
        self.events.push(DomainEvent::MarathonQuestionAnswered {
            game_id: self.id,
            player_id: self.player_id.clone(),
            question_id,
            is_correct,
            time_taken_ms,
            streak: self.current_streak,
            score: self.base_score,
            at: answered_at,
        });

        Ok(outcome)
    }

    fn clear_current_question(&mut self) {
        self.current_question = None;
        self.question_loaded_at = None;
        self.extra_seconds = 0;
    }

    fn record_assist(&mut self, question_id: QuestionId, assist: AssistType) -> DomainResult<()> {
        self.ensure_in_progress()?;
        self.ensure_current(&question_id)?;
        if self
            .used_hints
            .iter()
            .any(|u| u.question_id == question_id && u.assist == assist)
        {
            return Err(DomainError::conflict(format!(
                "{} already used on this question",
                assist.as_str()
            )));
        }
        if assist == AssistType::Shield && self.shield_active {
            return Err(DomainError::conflict("shield is already active"));
        }
        Ok(())
    }

    fn apply_assist(&mut self, question_id: QuestionId, assist: AssistType) -> DomainResult<AssistEffect> {
        let effect = match assist {
            AssistType::FiftyFifty => {
                let question = self.ensure_current(&question_id)?;
                AssistEffect::FiftyFifty {
                    removed_answer_ids: question.incorrect_answer_ids().into_iter().take(2).collect(),
                }
            }
            AssistType::ExtraTime | AssistType::Freeze => {
                self.extra_seconds += TIME_BONUS_SECS;
                AssistEffect::ExtraTime {
                    added_seconds: TIME_BONUS_SECS,
                    time_limit: self.time_limit(),
                }
            }
            AssistType::Skip => {
                self.answered_question_ids.push(question_id);
                self.clear_current_question();
                AssistEffect::Skip {
                    skipped_question_id: question_id,
                }
            }
            AssistType::Shield => {
                self.shield_active = true;
                AssistEffect::ShieldArmed
            }
        };
        self.used_hints.push(AssistUsage { question_id, assist });
        Ok(effect)
    }

    pub fn use_hint(
        &mut self,
        question_id: QuestionId,
        hint: HintType,
        now: i64,
    ) -> DomainResult<AssistEffect> {
        self.record_assist(question_id, hint.into())?;
        self.hints = self.hints.consume(hint)?;
        let effect = self.apply_assist(question_id, hint.into())?;
        self.events.push(DomainEvent::HintUsed {
            game_id: self.id,
            player_id: self.player_id.clone(),
            question_id,
            hint,
            at: now,
        });
        Ok(effect)
    }

    pub fn use_bonus(
        &mut self,
        question_id: QuestionId,
        bonus: BonusType,
        now: i64,
    ) -> DomainResult<AssistEffect> {
        self.record_assist(question_id, bonus.into())?;
        self.bonuses = self.bonuses.consume(bonus)?;
        let effect = self.apply_assist(question_id, bonus.into())?;
        self.events.push(DomainEvent::BonusUsed {
            game_id: self.id,
            player_id: self.player_id.clone(),
            question_id,
            bonus,
            at: now,
        });
        Ok(effect)
    }

    /// Coins needed for the next continue.
    pub fn continue_cost(&self) -> u32 {
        ContinueCostCalculator::cost(self.continue_count)
    }

    pub fn has_ad_option(&self) -> bool {
        ContinueCostCalculator::has_ad_option(self.continue_count)
    }

    /// Resumes a finished run with one life. Funds are checked by the caller.
    pub fn continue_game(&mut self, payment: PaymentMethod, now: i64) -> DomainResult<u32> {
        if self.status != MarathonStatus::GameOver {
            return Err(DomainError::state("continue is only possible after game over"));
        }
        let cost = match payment {
            PaymentMethod::Coins => self.continue_cost(),
            PaymentMethod::Ad if self.has_ad_option() => 0,
            PaymentMethod::Ad => {
                return Err(DomainError::not_available("no ad continues left"));
            }
        };
        self.transition(MarathonStatus::InProgress)?;
        self.lives = self.lives.reset_for_continue(now);
        self.continue_count += 1;
        self.finished_at = None;
        self.events.push(DomainEvent::ContinueUsed {
            game_id: self.id,
            player_id: self.player_id.clone(),
            payment,
            cost_coins: cost,
            continue_count: self.continue_count,
            at: now,
        });
        Ok(cost)
    }

    /// Ends the run: a live game is abandoned, a game-over run is closed as completed.
    pub fn abandon(&mut self, now: i64) -> DomainResult<()> {
        let target = match self.status {
            MarathonStatus::InProgress => MarathonStatus::Abandoned,
            MarathonStatus::GameOver => MarathonStatus::Completed,
            _ => {
                return Err(DomainError::state("marathon game is already finished"));
            }
        };
        self.transition(target)?;
        self.clear_current_question();
        if self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        self.events.push(DomainEvent::MarathonGameFinished {
            game_id: self.id,
            player_id: self.player_id.clone(),
            status: self.status,
            max_streak: self.max_streak,
            score: self.base_score,
            at: now,
        });
        Ok(())
    }

    pub fn is_new_record(&self) -> bool {
        match self.personal_best_streak {
            None => true,
            Some(best) => self.max_streak > best,
        }
    }

    /// 1-based index of the question being played.
    pub fn question_index(&self) -> u32 {
        self.answered_question_ids.len() as u32 + 1
    }

    /// Effective budget for the current question, bonuses included.
    pub fn time_limit(&self) -> u32 {
        self.difficulty.level().time_limit(self.question_index()) + self.extra_seconds
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> MarathonGameId {
        self.id
    }

    pub fn player_id(&self) -> &UserId {
        &self.player_id
    }

    pub fn category(&self) -> CategoryScope {
        self.category
    }

    pub fn status(&self) -> MarathonStatus {
        self.status
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<i64> {
        self.finished_at
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.current_question.as_ref()
    }

    pub fn answered_question_ids(&self) -> &[QuestionId] {
        &self.answered_question_ids
    }

    pub fn recent_question_ids(&self) -> Vec<QuestionId> {
        self.recent_question_ids.iter().copied().collect()
    }

    pub fn current_streak(&self) -> u32 {
        self.current_streak
    }

    pub fn max_streak(&self) -> u32 {
        self.max_streak
    }

    pub fn base_score(&self) -> u32 {
        self.base_score
    }

    pub fn lives(&self) -> LivesSystem {
        self.lives
    }

    pub fn hints(&self) -> HintsSystem {
        self.hints
    }

    pub fn bonuses(&self) -> BonusInventory {
        self.bonuses
    }

    pub fn difficulty(&self) -> DifficultyLevel {
        self.difficulty.level()
    }

    pub fn personal_best_streak(&self) -> Option<u32> {
        self.personal_best_streak
    }

    pub fn used_hints(&self) -> &[AssistUsage] {
        &self.used_hints
    }

    pub fn shield_active(&self) -> bool {
        self.shield_active
    }

    pub fn continue_count(&self) -> u32 {
        self.continue_count
    }
}
