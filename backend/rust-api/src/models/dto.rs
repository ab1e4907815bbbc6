//! Request and response bodies of the HTTP surface.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{DomainError, DomainResult};
use crate::models::daily::{next_streak_milestone, streak_bonus};
use crate::models::marathon::AssistEffect;
use crate::models::marathon_systems::next_milestone;
use crate::models::user::ProfileChanges;
use crate::models::{
    AnswerId, BonusType, Category, CategoryId, CategoryScope, Challenge, ChallengeId, ChallengeKind, ChallengeStatus,
    ChestReward, ChestType, DailyGame, DailyGameId, DailyGameStatus, DailyQuizId,
    DifficultyLevel, DuelMatch, DuelMatchId, DuelStatus, HintType, League, MarathonGame,
    MarathonGameId, MarathonStatus, Milestone, PaymentMethod, PersonalBest, PlayerRating, Question,
    QuestionDifficulty, QuestionId, Quiz, QuizId, QuizSession, ReferralId, SessionId,
    SessionStatus, StreakState, User, UserId, Wallet,
};

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

pub fn leaderboard_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT)
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOptionView {
    pub id: AnswerId,
    pub text: String,
}

/// Question as shown to players; correctness stays on the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub text: String,
    pub points: u32,
    pub difficulty: QuestionDifficulty,
    pub answers: Vec<AnswerOptionView>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id(),
            text: question.text().to_string(),
            points: question.points().value(),
            difficulty: question.difficulty(),
            answers: question
                .answers()
                .iter()
                .map(|a| AnswerOptionView {
                    id: a.id(),
                    text: a.text().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Marathon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMarathonRequest {
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonAnswerRequest {
    pub question_id: QuestionId,
    pub answer_id: Option<AnswerId>,
    pub time_taken_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseHintRequest {
    pub question_id: QuestionId,
    pub hint_type: HintType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseBonusRequest {
    pub question_id: QuestionId,
    pub bonus_type: BonusType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFrame {
    #[default]
    AllTime,
    Daily,
    Weekly,
}

impl TimeFrame {
    pub fn parse(value: Option<&str>) -> DomainResult<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("all_time") | Some("all-time") => Ok(TimeFrame::AllTime),
            Some("daily") => Ok(TimeFrame::Daily),
            Some("weekly") => Ok(TimeFrame::Weekly),
            Some(other) => Err(DomainError::invalid(format!(
                "unknown time frame '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonLeaderboardQuery {
    pub category_id: Option<String>,
    pub limit: Option<usize>,
    pub time_frame: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivesView {
    pub current: u32,
    pub max: u32,
    pub time_to_next_life: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneView {
    pub next: u32,
    pub remaining: u32,
}

impl MilestoneView {
    pub fn for_streak(streak: u32) -> Self {
        let (next, remaining) = next_milestone(streak);
        Self { next, remaining }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonGameView {
    pub game_id: MarathonGameId,
    pub player_id: UserId,
    pub status: MarathonStatus,
    pub category: CategoryScope,
    pub current_question: Option<QuestionView>,
    pub question_index: u32,
    pub time_limit: u32,
    pub current_streak: u32,
    pub max_streak: u32,
    pub base_score: u32,
    pub difficulty: DifficultyLevel,
    pub lives: LivesView,
    pub hints: crate::models::marathon_systems::HintsSystem,
    pub bonuses: crate::models::marathon_systems::BonusInventory,
    pub shield_active: bool,
    pub continue_count: u32,
    pub continue_cost: u32,
    pub has_ad_option: bool,
    pub personal_best_streak: Option<u32>,
    pub milestone: MilestoneView,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl MarathonGameView {
    pub fn new(game: &MarathonGame, now: i64) -> Self {
        let lives = game.lives().regenerate(now);
        Self {
            game_id: game.id(),
            player_id: game.player_id().clone(),
            status: game.status(),
            category: game.category(),
            current_question: game.current_question().map(QuestionView::from),
            question_index: game.question_index(),
            time_limit: game.time_limit(),
            current_streak: game.current_streak(),
            max_streak: game.max_streak(),
            base_score: game.base_score(),
            difficulty: game.difficulty(),
            lives: LivesView {
                current: lives.current_lives(),
                max: lives.max_lives(),
                time_to_next_life: lives.time_to_next_life(now),
            },
            hints: game.hints(),
            bonuses: game.bonuses(),
            shield_active: game.shield_active(),
            continue_count: game.continue_count(),
            continue_cost: game.continue_cost(),
            has_ad_option: game.has_ad_option(),
            personal_best_streak: game.personal_best_streak(),
            milestone: MilestoneView::for_streak(game.current_streak()),
            started_at: game.started_at(),
            finished_at: game.finished_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonAnswerResponse {
    pub is_correct: bool,
    pub correct_answer_id: Option<AnswerId>,
    pub points_earned: u32,
    pub shield_consumed: bool,
    pub life_lost: bool,
    pub difficulty_changed: bool,
    pub is_game_over: bool,
    pub is_new_record: bool,
    pub game: MarathonGameView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistResponse {
    pub effect: AssistEffect,
    pub game: MarathonGameView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponse {
    pub cost_coins: u32,
    pub coins_balance: u32,
    pub game: MarathonGameView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalBestView {
    pub category: CategoryScope,
    pub best_streak: u32,
    pub best_score: u32,
    pub achieved_at: i64,
}

impl From<&PersonalBest> for PersonalBestView {
    fn from(best: &PersonalBest) -> Self {
        Self {
            category: best.category(),
            best_streak: best.best_streak(),
            best_score: best.best_score(),
            achieved_at: best.achieved_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonLeaderboardEntry {
    pub rank: u32,
    pub player_id: UserId,
    pub username: String,
    pub best_streak: u32,
    pub best_score: u32,
    pub achieved_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarathonLeaderboard {
    pub category: CategoryScope,
    pub time_frame: TimeFrame,
    pub entries: Vec<MarathonLeaderboardEntry>,
}

// ---------------------------------------------------------------------------
// Daily challenge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAnswerRequest {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub time_taken_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLeaderboardQuery {
    pub date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakView {
    pub current_streak: u32,
    pub best_streak: u32,
    pub bonus_multiplier: f64,
    pub next_milestone: Option<u32>,
    pub last_played_date: Option<NaiveDate>,
}

impl StreakView {
    pub fn new(streak: StreakState, today: NaiveDate) -> Self {
        let current = streak.as_of(today);
        Self {
            current_streak: current,
            best_streak: streak.best_streak,
            bonus_multiplier: streak_bonus(current),
            next_milestone: next_streak_milestone(current),
            last_played_date: streak.last_played_date,
        }
    }
}

/// Score and chest stay hidden until the attempt is completed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyGameView {
    pub game_id: DailyGameId,
    pub player_id: UserId,
    pub date: NaiveDate,
    pub status: DailyGameStatus,
    pub attempt_number: u32,
    pub total_questions: u32,
    pub current_question_index: u32,
    pub current_question: Option<QuestionView>,
    pub base_score: Option<u32>,
    pub final_score: Option<u32>,
    pub chest: Option<ChestReward>,
    pub chest_opened: bool,
    pub rank: Option<u32>,
    pub streak: StreakView,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl DailyGameView {
    pub fn new(game: &DailyGame, current_question: Option<&Question>, today: NaiveDate) -> Self {
        let completed = game.status().is_terminal();
        Self {
            game_id: game.id(),
            player_id: game.player_id().clone(),
            date: game.date(),
            status: game.status(),
            attempt_number: game.attempt_number(),
            total_questions: game.question_ids().len() as u32,
            current_question_index: game.session().current_question_index,
            current_question: current_question.map(QuestionView::from),
            base_score: completed.then(|| game.base_score()),
            final_score: completed.then(|| game.final_score()),
            chest: game.chest(),
            chest_opened: game.chest_opened(),
            rank: game.rank(),
            streak: StreakView::new(game.streak(), today),
            started_at: game.session().started_at,
            finished_at: game.finished_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAnswerResponse {
    pub question_index: u32,
    pub is_completed: bool,
    pub game: DailyGameView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChestOpenResponse {
    pub chest_type: ChestType,
    pub coins: u32,
    pub newly_opened: bool,
    pub coins_balance: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatusView {
    pub date: NaiveDate,
    pub daily_quiz_id: DailyQuizId,
    pub game: Option<DailyGameView>,
    pub attempts_used: u32,
    pub attempts_left: u32,
    pub retry_cost_coins: u32,
    pub time_to_reset_secs: i64,
    pub total_players: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLeaderboardEntry {
    pub rank: u32,
    pub player_id: UserId,
    pub username: String,
    pub base_score: u32,
    pub finished_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLeaderboard {
    pub date: NaiveDate,
    pub total_players: u32,
    pub player_rank: Option<u32>,
    pub entries: Vec<DailyLeaderboardEntry>,
}

// Duel

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChallengeRequest {
    pub friend_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeAction {
    Accept,
    Decline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondChallengeRequest {
    pub action: ChallengeAction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub player_id: UserId,
    pub mmr: i32,
    pub peak_mmr: i32,
    pub league: League,
    pub division: Option<&'static str>,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_streak: u32,
    pub games_played: u32,
    pub season_id: String,
    pub season_wins: u32,
    pub season_losses: u32,
}

impl From<&PlayerRating> for RatingView {
    fn from(rating: &PlayerRating) -> Self {
        Self {
            player_id: rating.player_id.clone(),
            mmr: rating.mmr,
            peak_mmr: rating.peak_mmr,
            league: rating.league(),
            division: rating.division(),
            wins: rating.wins,
            losses: rating.losses,
            draws: rating.draws,
            win_streak: rating.win_streak,
            games_played: rating.games_played,
            season_id: rating.season_id.clone(),
            season_wins: rating.season_wins,
            season_losses: rating.season_losses,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub in_queue: bool,
    pub queue_size: usize,
    pub tickets: u32,
    pub match_id: Option<DuelMatchId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelMatchView {
    pub match_id: DuelMatchId,
    pub player1_id: UserId,
    pub player2_id: UserId,
    pub status: DuelStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    pub player1_score: u32,
    pub player2_score: u32,
    pub winner_id: Option<UserId>,
    pub forfeited_by: Option<UserId>,
    pub rematch_of: Option<DuelMatchId>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

impl From<&DuelMatch> for DuelMatchView {
    fn from(duel: &DuelMatch) -> Self {
        Self {
            match_id: duel.id(),
            player1_id: duel.player1_id().clone(),
            player2_id: duel.player2_id().clone(),
            status: duel.status(),
            current_round: duel.current_round(),
            total_rounds: duel.total_rounds(),
            player1_score: duel.player1_score(),
            player2_score: duel.player2_score(),
            winner_id: duel.winner_id().cloned(),
            forfeited_by: duel.forfeited_by().cloned(),
            rematch_of: duel.rematch_of(),
            created_at: duel.created_at(),
            finished_at: duel.finished_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub challenge_id: ChallengeId,
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
    pub challenger_id: UserId,
    pub challenged_id: Option<UserId>,
    pub expires_at: i64,
    pub match_id: Option<DuelMatchId>,
    pub rematch_of: Option<DuelMatchId>,
    pub share_link: Option<String>,
}

impl ChallengeView {
    pub fn new(challenge: &Challenge, bot_username: &str) -> Self {
        let share_link = (challenge.kind() == ChallengeKind::Link)
            .then(|| challenge.share_link(bot_username));
        Self {
            challenge_id: challenge.id(),
            kind: challenge.kind(),
            status: challenge.status(),
            challenger_id: challenge.challenger_id().clone(),
            challenged_id: challenge.challenged_id().cloned(),
            expires_at: challenge.expires_at(),
            match_id: challenge.match_id(),
            rematch_of: challenge.rematch_of(),
            share_link,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: ChallengeView,
    pub duel: Option<DuelMatchView>,
}

/// Either the new match (opponent had asked too) or the pending request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RematchResponse {
    pub duel: Option<DuelMatchView>,
    pub challenge: Option<ChallengeView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelStatusView {
    pub rating: RatingView,
    pub tickets: u32,
    pub in_queue: bool,
    pub queue_size: usize,
    pub active_match: Option<DuelMatchView>,
    pub pending_challenges: Vec<ChallengeView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelResult {
    Win,
    Loss,
    Draw,
    Abandoned,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelHistoryEntry {
    pub match_id: DuelMatchId,
    pub opponent_id: UserId,
    pub opponent_username: String,
    pub my_score: u32,
    pub opponent_score: u32,
    pub result: DuelResult,
    pub mmr_delta: Option<i32>,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelLeaderboardEntry {
    pub rank: u32,
    pub player_id: UserId,
    pub username: String,
    pub mmr: i32,
    pub league: League,
    pub division: Option<&'static str>,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelLeaderboardKind {
    #[default]
    Seasonal,
    AllTime,
    Referrals,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DuelLeaderboardQuery {
    #[serde(rename = "type", default)]
    pub kind: DuelLeaderboardKind,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralLeaderboardEntry {
    pub rank: u32,
    pub player_id: UserId,
    pub username: String,
    pub total_referrals: u32,
    pub active_referrals: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DuelLeaderboardEntries {
    Ratings(Vec<DuelLeaderboardEntry>),
    Referrals(Vec<ReferralLeaderboardEntry>),
}

impl DuelLeaderboardEntries {
    pub fn len(&self) -> usize {
        match self {
            DuelLeaderboardEntries::Ratings(entries) => entries.len(),
            DuelLeaderboardEntries::Referrals(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelLeaderboard {
    #[serde(rename = "type")]
    pub kind: DuelLeaderboardKind,
    pub season_id: String,
    pub ends_at: i64,
    pub entries: DuelLeaderboardEntries,
    /// Caller's position on this board; absent for anonymous reads.
    pub player_rank: Option<u32>,
}

/// One side's view of a referral: the other player and what is left to claim.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralView {
    pub referral_id: ReferralId,
    pub friend_id: UserId,
    pub friend_username: String,
    pub milestones: Vec<Milestone>,
    pub pending_rewards: Vec<Milestone>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralsView {
    pub total_referrals: u32,
    pub active_referrals: u32,
    pub leaderboard_rank: Option<u32>,
    pub referrals: Vec<ReferralView>,
    pub invited_by: Option<ReferralView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReferralRequest {
    pub friend_id: UserId,
    pub milestone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReferralResponse {
    pub milestone: Milestone,
    pub tickets: u32,
    pub coins: u32,
    pub cosmetic: Option<&'static str>,
    pub wallet_coins: u32,
    pub wallet_tickets: u32,
}

// Classic quizzes

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummaryView {
    pub id: QuizId,
    pub title: String,
    pub description: String,
    pub category_id: Option<CategoryId>,
    pub tags: Vec<String>,
    pub time_limit: u32,
    pub passing_score: u32,
    pub question_count: u32,
    pub total_points: u32,
}

impl From<&Quiz> for QuizSummaryView {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id(),
            title: quiz.title().to_string(),
            description: quiz.description().to_string(),
            category_id: quiz.category_id(),
            tags: quiz.tags().map(str::to_string).collect(),
            time_limit: quiz.time_limit().seconds(),
            passing_score: quiz.passing_score().percentage(),
            question_count: quiz.questions().len() as u32,
            total_points: quiz.total_points(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDetailView {
    #[serde(flatten)]
    pub summary: QuizSummaryView,
    pub questions: Vec<QuestionView>,
}

impl From<&Quiz> for QuizDetailView {
    fn from(quiz: &Quiz) -> Self {
        Self {
            summary: QuizSummaryView::from(quiz),
            questions: quiz.questions().iter().map(QuestionView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub quiz_id: QuizId,
    pub status: SessionStatus,
    pub score: u32,
    pub current_question: u32,
    pub total_questions: u32,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl From<&QuizSession> for SessionView {
    fn from(session: &QuizSession) -> Self {
        Self {
            session_id: session.id(),
            quiz_id: session.quiz_id(),
            status: session.status(),
            score: session.score(),
            current_question: session.current_question(),
            total_questions: session.total_questions(),
            started_at: session.started_at(),
            completed_at: session.completed_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuizResponse {
    pub session: SessionView,
    pub quiz: QuizDetailView,
    pub completed_today: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerRequest {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerResponse {
    pub is_correct: bool,
    pub points_earned: u32,
    pub correct_answer_id: Option<AnswerId>,
    pub passed: Option<bool>,
    pub session: SessionView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntryView {
    pub rank: u32,
    pub user_id: UserId,
    pub username: String,
    pub score: u32,
    pub achieved_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub id: CategoryId,
    pub name: String,
    pub created_at: i64,
}

impl From<&Category> for CategoryView {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id,
            name: category.name.clone(),
            created_at: category.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters"))]
    pub name: String,
}

// Users

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Username must be between 1 and 100 characters"))]
    pub username: Option<String>,
    pub telegram_username: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
    pub language_code: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileChanges {
    fn from(req: UpdateProfileRequest) -> Self {
        Self {
            username: req.username,
            telegram_username: req.telegram_username,
            email: req.email,
            avatar_url: req.avatar_url,
            language_code: req.language_code,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub telegram_username: Option<String>,
    pub avatar_url: Option<String>,
    pub language_code: String,
    pub created_at: i64,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.display_name().to_string(),
            telegram_username: user.telegram_username.clone(),
            avatar_url: user.avatar_url.clone(),
            language_code: user.language_code.clone(),
            created_at: user.created_at,
        }
    }
}

/// The caller's own profile, including private fields and balance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: UserView,
    pub email: Option<String>,
    pub coins: u32,
    pub tickets: u32,
}

impl ProfileView {
    pub fn new(user: &User, wallet: &Wallet) -> Self {
        Self {
            user: UserView::from(user),
            email: user.email.clone(),
            coins: wallet.coins,
            tickets: wallet.tickets,
        }
    }
}
