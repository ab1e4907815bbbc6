//! Value types owned by a marathon game. Every transformation returns a new value.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::question::QuestionDifficulty;

pub const MAX_LIVES: u32 = 3;
pub const LIFE_REGEN_INTERVAL_SECS: i64 = 14_400;
pub const TIME_BONUS_SECS: u32 = 10;
pub const MILESTONES: [u32; 5] = [25, 50, 100, 200, 500];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivesSystem {
    current_lives: u32,
    max_lives: u32,
    regen_interval_secs: i64,
    last_update: i64,
}

impl LivesSystem {
    pub fn new(now: i64) -> Self {
        Self::with_lives(MAX_LIVES, now)
    }

    pub fn with_lives(lives: u32, now: i64) -> Self {
        Self {
            current_lives: lives.min(MAX_LIVES),
            max_lives: MAX_LIVES,
            regen_interval_secs: LIFE_REGEN_INTERVAL_SECS,
            last_update: now,
        }
    }

    pub fn current_lives(&self) -> u32 {
        self.current_lives
    }

    pub fn max_lives(&self) -> u32 {
        self.max_lives
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn has_lives(&self) -> bool {
        self.current_lives > 0
    }

    pub fn is_full(&self) -> bool {
        self.current_lives >= self.max_lives
    }

    pub fn lose_life(&self, now: i64) -> Self {
        Self {
            current_lives: self.current_lives.saturating_sub(1),
            last_update: now,
            ..*self
        }
    }

    /// Adds one life per elapsed interval, capped at `max_lives`.
    pub fn regenerate(&self, now: i64) -> Self {
        if self.is_full() {
            return *self;
        }
        let elapsed = now - self.last_update;
        if elapsed <= 0 {
            return *self;
        }
        let regenerated = (elapsed / self.regen_interval_secs) as u32;
        if regenerated == 0 {
            return *self;
        }
        Self {
            current_lives: (self.current_lives + regenerated).min(self.max_lives),
            last_update: now,
            ..*self
        }
    }

    /// Seconds until the next life, `None` when lives are full.
    pub fn time_to_next_life(&self, now: i64) -> Option<i64> {
        if self.is_full() {
            return None;
        }
        let elapsed = (now - self.last_update).max(0);
        Some(self.regen_interval_secs - (elapsed % self.regen_interval_secs))
    }

    pub fn reset_for_continue(&self, now: i64) -> Self {
        Self {
            current_lives: 1,
            last_update: now,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintType {
    FiftyFifty,
    ExtraTime,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    Shield,
    FiftyFifty,
    Skip,
    Freeze,
}

/// Key of the per-question usage ledger shared by hints and bonuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistType {
    FiftyFifty,
    ExtraTime,
    Skip,
    Shield,
    Freeze,
}

impl From<HintType> for AssistType {
    fn from(hint: HintType) -> Self {
        match hint {
            HintType::FiftyFifty => AssistType::FiftyFifty,
            HintType::ExtraTime => AssistType::ExtraTime,
            HintType::Skip => AssistType::Skip,
        }
    }
}

impl From<BonusType> for AssistType {
    fn from(bonus: BonusType) -> Self {
        match bonus {
            BonusType::Shield => AssistType::Shield,
            BonusType::FiftyFifty => AssistType::FiftyFifty,
            BonusType::Skip => AssistType::Skip,
            BonusType::Freeze => AssistType::Freeze,
        }
    }
}

impl AssistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistType::FiftyFifty => "fifty_fifty",
            AssistType::ExtraTime => "extra_time",
            AssistType::Skip => "skip",
            AssistType::Shield => "shield",
            AssistType::Freeze => "freeze",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusInventory {
    pub shield: u32,
    pub fifty_fifty: u32,
    pub skip: u32,
    pub freeze: u32,
}

impl Default for BonusInventory {
    fn default() -> Self {
        Self {
            shield: 2,
            fifty_fifty: 1,
            skip: 0,
            freeze: 3,
        }
    }
}

impl BonusInventory {
    pub fn count(&self, bonus: BonusType) -> u32 {
        match bonus {
            BonusType::Shield => self.shield,
            BonusType::FiftyFifty => self.fifty_fifty,
            BonusType::Skip => self.skip,
            BonusType::Freeze => self.freeze,
        }
    }

    pub fn consume(&self, bonus: BonusType) -> DomainResult<Self> {
        if self.count(bonus) == 0 {
            return Err(DomainError::exhausted(format!(
                "no {} bonus left",
                AssistType::from(bonus).as_str()
            )));
        }
        let mut next = *self;
        match bonus {
            BonusType::Shield => next.shield -= 1,
            BonusType::FiftyFifty => next.fifty_fifty -= 1,
            BonusType::Skip => next.skip -= 1,
            BonusType::Freeze => next.freeze -= 1,
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintsSystem {
    pub fifty_fifty: u32,
    pub extra_time: u32,
    pub skip: u32,
}

impl Default for HintsSystem {
    fn default() -> Self {
        Self {
            fifty_fifty: 3,
            extra_time: 2,
            skip: 1,
        }
    }
}

impl HintsSystem {
    pub fn count(&self, hint: HintType) -> u32 {
        match hint {
            HintType::FiftyFifty => self.fifty_fifty,
            HintType::ExtraTime => self.extra_time,
            HintType::Skip => self.skip,
        }
    }

    pub fn consume(&self, hint: HintType) -> DomainResult<Self> {
        if self.count(hint) == 0 {
            return Err(DomainError::exhausted(format!(
                "no {} hint left",
                AssistType::from(hint).as_str()
            )));
        }
        let mut next = *self;
        match hint {
            HintType::FiftyFifty => next.fifty_fifty -= 1,
            HintType::ExtraTime => next.extra_time -= 1,
            HintType::Skip => next.skip -= 1,
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Beginner,
    Medium,
    Hard,
    Master,
}

/// Share of each question difficulty drawn at a level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyDistribution {
    pub easy: f64,
    pub medium: f64,
    pub hard: f64,
}

impl DifficultyDistribution {
    /// Non-zero buckets in a fixed easy/medium/hard order.
    pub fn entries(&self) -> Vec<(QuestionDifficulty, f64)> {
        [
            (QuestionDifficulty::Easy, self.easy),
            (QuestionDifficulty::Medium, self.medium),
            (QuestionDifficulty::Hard, self.hard),
        ]
        .into_iter()
        .filter(|(_, weight)| *weight > 0.0)
        .collect()
    }
}

impl DifficultyLevel {
    pub fn for_streak(streak: u32) -> Self {
        match streak {
            0..=5 => DifficultyLevel::Beginner,
            6..=15 => DifficultyLevel::Medium,
            16..=30 => DifficultyLevel::Hard,
            _ => DifficultyLevel::Master,
        }
    }

    pub fn distribution(&self) -> DifficultyDistribution {
        let (easy, medium, hard) = match self {
            DifficultyLevel::Beginner => (0.8, 0.2, 0.0),
            DifficultyLevel::Medium => (0.0, 1.0, 0.0),
            DifficultyLevel::Hard => (0.0, 0.7, 0.3),
            DifficultyLevel::Master => (0.0, 0.0, 1.0),
        };
        DifficultyDistribution { easy, medium, hard }
    }

    /// Per-question budget in seconds; `question_index` is 1-based.
    pub fn time_limit(&self, question_index: u32) -> u32 {
        match self {
            DifficultyLevel::Beginner if question_index <= 10 => 15,
            DifficultyLevel::Beginner => 12,
            DifficultyLevel::Medium if question_index <= 10 => 12,
            DifficultyLevel::Medium => 10,
            DifficultyLevel::Hard => 10,
            DifficultyLevel::Master => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Medium => "medium",
            DifficultyLevel::Hard => "hard",
            DifficultyLevel::Master => "master",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyProgression {
    level: DifficultyLevel,
}

impl Default for DifficultyProgression {
    fn default() -> Self {
        Self {
            level: DifficultyLevel::Beginner,
        }
    }
}

impl DifficultyProgression {
    pub fn level(&self) -> DifficultyLevel {
        self.level
    }

    /// Level after a correct answer; never lower than the current one.
    pub fn after_correct(&self, streak: u32) -> Self {
        Self {
            level: self.level.max(DifficultyLevel::for_streak(streak)),
        }
    }

    pub fn reset(&self) -> Self {
        Self::default()
    }
}

pub struct ContinueCostCalculator;

impl ContinueCostCalculator {
    pub const BASE_COST: u32 = 200;
    pub const COST_STEP: u32 = 200;
    pub const MAX_AD_CONTINUES: u32 = 3;

    pub fn cost(continue_count: u32) -> u32 {
        Self::BASE_COST + Self::COST_STEP * continue_count
    }

    pub fn has_ad_option(continue_count: u32) -> bool {
        continue_count < Self::MAX_AD_CONTINUES
    }
}

/// Next streak milestone and the distance to it, `(0, 0)` past the last one.
pub fn next_milestone(score: u32) -> (u32, u32) {
    MILESTONES
        .iter()
        .find(|m| **m > score)
        .map(|m| (*m, m - score))
        .unwrap_or((0, 0))
}
