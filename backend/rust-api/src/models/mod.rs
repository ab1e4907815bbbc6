pub mod challenge;
pub mod daily;
pub mod dto;
pub mod duel;
pub mod events;
pub mod filter;
pub mod ids;
pub mod marathon;
pub mod marathon_systems;
pub mod personal_best;
pub mod question;
pub mod quiz;
pub mod rating;
pub mod referral;
pub mod user;

pub use challenge::{Challenge, ChallengeKind, ChallengeStatus};
pub use daily::{ChestReward, ChestType, DailyGame, DailyGameStatus, DailyQuiz, StreakState};
pub use duel::{DuelMatch, DuelStatus, RoundAnswer};
pub use events::DomainEvent;
pub use filter::QuestionFilter;
pub use ids::*;
pub use marathon::{AssistEffect, CategoryScope, MarathonGame, MarathonStatus};
pub use marathon_systems::{BonusType, DifficultyLevel, HintType, LivesSystem};
pub use personal_best::PersonalBest;
pub use question::{Answer, PassingScore, Points, Question, QuestionDifficulty, TimeLimit};
pub use quiz::{Category, Quiz, QuizSession, SessionStatus, Tag};
pub use rating::{League, MatchOutcome, PlayerRating, Season};
pub use referral::{Milestone, Referral, ReferralReward, ReferralSide};
pub use user::{PaymentMethod, User, Wallet};
