//! Persistence contracts. Services only talk to storage through these traits;
//! `memory` backs tests and local runs, `mongo` backs deployments.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use crate::error::DomainResult;
use crate::models::{
    Category, CategoryId, CategoryScope, Challenge, ChallengeId, DailyGame, DailyGameId, DailyQuiz,
    DuelMatch, DuelMatchId, MarathonGame, MarathonGameId, PersonalBest, PlayerRating, Question,
    QuestionFilter, QuestionId, Quiz, QuizId, QuizSession, Referral, ReferralId, SessionId, Tag,
    User, UserId, Wallet,
};

pub mod memory;
pub mod mongo;

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn find_by_id(&self, id: QuestionId) -> DomainResult<Option<Question>>;
    /// Returns the found questions in the order of `ids`; unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[QuestionId]) -> DomainResult<Vec<Question>>;
    async fn find_by_filter(&self, filter: &QuestionFilter) -> DomainResult<Vec<Question>>;
    /// Uniform sample of at most `count` matching questions.
    async fn find_random_questions(
        &self,
        filter: &QuestionFilter,
        count: usize,
    ) -> DomainResult<Vec<Question>>;
    async fn count_by_filter(&self, filter: &QuestionFilter) -> DomainResult<u64>;
    async fn save(&self, question: &Question) -> DomainResult<()>;
    async fn save_all(&self, questions: &[Question]) -> DomainResult<()>;
    async fn delete(&self, id: QuestionId) -> DomainResult<()>;
}

#[async_trait]
pub trait QuizRepository: Send + Sync {
    async fn save(&self, quiz: &Quiz) -> DomainResult<()>;
    async fn find_by_id(&self, id: QuizId) -> DomainResult<Option<Quiz>>;
    async fn find_all(&self) -> DomainResult<Vec<Quiz>>;
    async fn find_by_title(&self, title: &str) -> DomainResult<Option<Quiz>>;
    async fn delete(&self, id: QuizId) -> DomainResult<()>;
}

#[async_trait]
pub trait QuizSessionRepository: Send + Sync {
    async fn save(&self, session: &QuizSession) -> DomainResult<()>;
    async fn find_by_id(&self, id: SessionId) -> DomainResult<Option<QuizSession>>;
    async fn find_active(&self, user_id: &UserId, quiz_id: QuizId)
        -> DomainResult<Option<QuizSession>>;
    /// Completed sessions of `user_id` on `quiz_id` finished in `[start, end)`.
    async fn find_completed_by_user_quiz_and_date(
        &self,
        user_id: &UserId,
        quiz_id: QuizId,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<QuizSession>>;
}

/// One leaderboard line: a player's best score, ties broken by who got there first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreRow {
    pub user_id: UserId,
    pub score: u32,
    pub achieved_at: i64,
}

/// Ranks completed quiz sessions, keeping only the best one per player.
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    async fn top_for_quiz(&self, quiz_id: QuizId, limit: usize) -> DomainResult<Vec<ScoreRow>>;
    /// Sum of each player's best score per quiz.
    async fn top_global(&self, limit: usize) -> DomainResult<Vec<ScoreRow>>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn save(&self, category: &Category) -> DomainResult<()>;
    async fn find_by_id(&self, id: CategoryId) -> DomainResult<Option<Category>>;
    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Category>>;
    async fn find_all(&self) -> DomainResult<Vec<Category>>;
}

#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn save(&self, tag: &Tag) -> DomainResult<()>;
    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Tag>>;
    async fn find_all(&self) -> DomainResult<Vec<Tag>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn save(&self, user: &User) -> DomainResult<()>;
    async fn find_by_id(&self, id: &UserId) -> DomainResult<Option<User>>;
    async fn find_by_telegram_username(&self, username: &str) -> DomainResult<Option<User>>;
    async fn find_by_ids(&self, ids: &[UserId]) -> DomainResult<Vec<User>>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<Wallet>>;
    async fn save(&self, wallet: &Wallet) -> DomainResult<()>;
}

#[async_trait]
pub trait MarathonGameRepository: Send + Sync {
    async fn save(&self, game: &MarathonGame) -> DomainResult<()>;
    async fn find_by_id(&self, id: MarathonGameId) -> DomainResult<Option<MarathonGame>>;
    /// The player's `in_progress` or `game_over` game, if any.
    async fn find_active_by_player(&self, player_id: &UserId)
        -> DomainResult<Option<MarathonGame>>;
    /// Games of `category` that finished in `[start, end)`.
    async fn find_finished_between(
        &self,
        category: CategoryScope,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<MarathonGame>>;
}

#[async_trait]
pub trait PersonalBestRepository: Send + Sync {
    async fn save(&self, best: &PersonalBest) -> DomainResult<()>;
    async fn find_by_player_and_category(
        &self,
        player_id: &UserId,
        category: CategoryScope,
    ) -> DomainResult<Option<PersonalBest>>;
    async fn find_by_player(&self, player_id: &UserId) -> DomainResult<Vec<PersonalBest>>;
    /// Ordered by best streak, then best score, both descending.
    async fn find_top_by_category(
        &self,
        category: CategoryScope,
        limit: usize,
    ) -> DomainResult<Vec<PersonalBest>>;
}

#[async_trait]
pub trait DailyQuizRepository: Send + Sync {
    async fn save(&self, quiz: &DailyQuiz) -> DomainResult<()>;
    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Option<DailyQuiz>>;
}

#[async_trait]
pub trait DailyGameRepository: Send + Sync {
    async fn save(&self, game: &DailyGame) -> DomainResult<()>;
    async fn find_by_id(&self, id: DailyGameId) -> DomainResult<Option<DailyGame>>;
    /// Every attempt of the player on `date`, oldest attempt first.
    async fn find_by_player_and_date(
        &self,
        player_id: &UserId,
        date: NaiveDate,
    ) -> DomainResult<Vec<DailyGame>>;
    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Vec<DailyGame>>;
    /// Latest completed first attempt strictly before `date`; carries the day streak.
    async fn find_last_completed_first_attempt(
        &self,
        player_id: &UserId,
        before: NaiveDate,
    ) -> DomainResult<Option<DailyGame>>;
}

#[async_trait]
pub trait DuelMatchRepository: Send + Sync {
    async fn save(&self, duel: &DuelMatch) -> DomainResult<()>;
    async fn find_by_id(&self, id: DuelMatchId) -> DomainResult<Option<DuelMatch>>;
    /// A `pending_ready` or `in_progress` match of the player.
    async fn find_active_by_player(&self, player_id: &UserId) -> DomainResult<Option<DuelMatch>>;
    /// Most recent matches first.
    async fn find_by_player(&self, player_id: &UserId, limit: usize)
        -> DomainResult<Vec<DuelMatch>>;
}

#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    async fn save(&self, challenge: &Challenge) -> DomainResult<()>;
    async fn find_by_id(&self, id: ChallengeId) -> DomainResult<Option<Challenge>>;
    async fn find_by_token(&self, token: &str) -> DomainResult<Option<Challenge>>;
    /// Pending challenges addressed to the player.
    async fn find_pending_for(&self, player_id: &UserId) -> DomainResult<Vec<Challenge>>;
    /// Pending rematch request for `match_id` sent by `challenger_id`.
    async fn find_pending_rematch(
        &self,
        match_id: DuelMatchId,
        challenger_id: &UserId,
    ) -> DomainResult<Option<Challenge>>;
}

#[async_trait]
pub trait PlayerRatingRepository: Send + Sync {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<PlayerRating>>;
    async fn save(&self, rating: &PlayerRating) -> DomainResult<()>;
    /// Highest MMR first.
    async fn find_top(&self, limit: usize) -> DomainResult<Vec<PlayerRating>>;
    /// Same order as `find_top`, restricted to ratings already in `season_id`.
    async fn find_top_in_season(
        &self,
        season_id: &str,
        limit: usize,
    ) -> DomainResult<Vec<PlayerRating>>;
    /// 1-based position in the season table, `None` outside it.
    async fn rank_in_season(&self, player_id: &UserId, season_id: &str)
        -> DomainResult<Option<u32>>;
}

/// One inviter on the referral leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralRow {
    pub inviter_id: UserId,
    pub total: u32,
    pub active: u32,
}

#[async_trait]
pub trait ReferralRepository: Send + Sync {
    /// Rejects a second referral for the same invitee.
    async fn save(&self, referral: &Referral) -> DomainResult<()>;
    async fn find_by_id(&self, id: ReferralId) -> DomainResult<Option<Referral>>;
    async fn find_by_invitee(&self, invitee_id: &UserId) -> DomainResult<Option<Referral>>;
    /// Oldest first.
    async fn find_by_inviter(&self, inviter_id: &UserId) -> DomainResult<Vec<Referral>>;
    /// Inviters by total referrals, then active ones.
    async fn leaderboard(&self, limit: usize) -> DomainResult<Vec<ReferralRow>>;
    async fn rank_of(&self, inviter_id: &UserId) -> DomainResult<Option<u32>>;
}

/// Every repository the services need, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub questions: Arc<dyn QuestionRepository>,
    pub quizzes: Arc<dyn QuizRepository>,
    pub sessions: Arc<dyn QuizSessionRepository>,
    pub leaderboard: Arc<dyn LeaderboardRepository>,
    pub categories: Arc<dyn CategoryRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub users: Arc<dyn UserRepository>,
    pub wallets: Arc<dyn WalletRepository>,
    pub marathon_games: Arc<dyn MarathonGameRepository>,
    pub personal_bests: Arc<dyn PersonalBestRepository>,
    pub daily_quizzes: Arc<dyn DailyQuizRepository>,
    pub daily_games: Arc<dyn DailyGameRepository>,
    pub duel_matches: Arc<dyn DuelMatchRepository>,
    pub challenges: Arc<dyn ChallengeRepository>,
    pub ratings: Arc<dyn PlayerRatingRepository>,
    pub referrals: Arc<dyn ReferralRepository>,
}

impl Repositories {
    /// Wires one store that implements every contract.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: QuestionRepository
            + QuizRepository
            + QuizSessionRepository
            + LeaderboardRepository
            + CategoryRepository
            + TagRepository
            + UserRepository
            + WalletRepository
            + MarathonGameRepository
            + PersonalBestRepository
            + DailyQuizRepository
            + DailyGameRepository
            + DuelMatchRepository
            + ChallengeRepository
            + PlayerRatingRepository
            + ReferralRepository
            + 'static,
    {
        Self {
            questions: store.clone(),
            quizzes: store.clone(),
            sessions: store.clone(),
            leaderboard: store.clone(),
            categories: store.clone(),
            tags: store.clone(),
            users: store.clone(),
            wallets: store.clone(),
            marathon_games: store.clone(),
            personal_bests: store.clone(),
            daily_quizzes: store.clone(),
            daily_games: store.clone(),
            duel_matches: store.clone(),
            challenges: store.clone(),
            ratings: store.clone(),
            referrals: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(memory::InMemoryStore::default()))
    }
}

/// Ranks rows by score desc then earliest achievement, keeping one row per player.
pub(crate) fn best_per_player(rows: Vec<ScoreRow>, limit: usize) -> Vec<ScoreRow> {
    use std::collections::HashMap;

    let mut best: HashMap<UserId, ScoreRow> = HashMap::new();
    for row in rows {
        match best.get(&row.user_id) {
            Some(current)
                if current.score > row.score
                    || (current.score == row.score && current.achieved_at <= row.achieved_at) => {}
            _ => {
                best.insert(row.user_id.clone(), row);
            }
        }
    }
    let mut ranked: Vec<ScoreRow> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.achieved_at.cmp(&b.achieved_at))
            .then(a.user_id.cmp(&b.user_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Orders inviter rows by total, then active, then id.
pub(crate) fn rank_referral_rows(mut rows: Vec<ReferralRow>) -> Vec<ReferralRow> {
    rows.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then(b.active.cmp(&a.active))
            .then(a.inviter_id.cmp(&b.inviter_id))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: i64, score: u32, at: i64) -> ScoreRow {
        ScoreRow {
            user_id: UserId::from_platform(user),
            score,
            achieved_at: at,
        }
    }

    #[test]
    fn test_best_per_player_keeps_highest_and_earliest() {
        let ranked = best_per_player(
            vec![row(1, 60, 10), row(1, 80, 20), row(2, 80, 15), row(2, 80, 30), row(3, 10, 1)],
            10,
        );
        assert_eq!(ranked, vec![row(2, 80, 15), row(1, 80, 20), row(3, 10, 1)]);
        assert_eq!(best_per_player(ranked, 1).len(), 1);
    }
}
