use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::challenge::ChallengeKind;
use crate::models::daily::ChestType;
use crate::models::ids::{
    AnswerId, ChallengeId, DailyGameId, DailyQuizId, DuelMatchId, MarathonGameId, QuestionId,
    QuizId, ReferralId, SessionId, UserId,
};
use crate::models::marathon::{CategoryScope, MarathonStatus};
use crate::models::marathon_systems::{BonusType, DifficultyLevel, HintType};
use crate::models::referral::Milestone;
use crate::models::user::PaymentMethod;

/// Side products of aggregate transitions, published after a successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    QuizStarted {
        session_id: SessionId,
        quiz_id: QuizId,
        user_id: UserId,
        at: i64,
    },
    AnswerSubmitted {
        session_id: SessionId,
        question_id: QuestionId,
        answer_id: AnswerId,
        is_correct: bool,
        points: u32,
        at: i64,
    },
    QuizCompleted {
        session_id: SessionId,
        quiz_id: QuizId,
        user_id: UserId,
        score: u32,
        passed: bool,
        at: i64,
    },
    MarathonGameStarted {
        game_id: MarathonGameId,
        player_id: UserId,
        category: CategoryScope,
        at: i64,
    },
    MarathonQuestionAnswered {
        game_id: MarathonGameId,
        player_id: UserId,
        question_id: QuestionId,
        is_correct: bool,
        time_taken_ms: i64,
        streak: u32,
        score: u32,
        at: i64,
    },
    DifficultyIncreased {
        game_id: MarathonGameId,
        player_id: UserId,
        from: DifficultyLevel,
        to: DifficultyLevel,
        streak: u32,
        at: i64,
    },
    LifeLost {
        game_id: MarathonGameId,
        player_id: UserId,
        lives_remaining: u32,
        at: i64,
    },
    ShieldConsumed {
        game_id: MarathonGameId,
        player_id: UserId,
        question_id: QuestionId,
        at: i64,
    },
    HintUsed {
        game_id: MarathonGameId,
        player_id: UserId,
        question_id: QuestionId,
        hint: HintType,
        at: i64,
    },
    BonusUsed {
        game_id: MarathonGameId,
        player_id: UserId,
        question_id: QuestionId,
        bonus: BonusType,
        at: i64,
    },
    ContinueUsed {
        game_id: MarathonGameId,
        player_id: UserId,
        payment: PaymentMethod,
        cost_coins: u32,
        continue_count: u32,
        at: i64,
    },
    MarathonGameOver {
        game_id: MarathonGameId,
        player_id: UserId,
        max_streak: u32,
        score: u32,
        is_new_record: bool,
        previous_record: Option<u32>,
        at: i64,
    },
    MarathonGameFinished {
        game_id: MarathonGameId,
        player_id: UserId,
        status: MarathonStatus,
        max_streak: u32,
        score: u32,
        at: i64,
    },
    PersonalBestUpdated {
        player_id: UserId,
        category: CategoryScope,
        best_streak: u32,
        best_score: u32,
        previous_streak: Option<u32>,
        at: i64,
    },
    DailyQuizCreated {
        daily_quiz_id: DailyQuizId,
        date: NaiveDate,
        question_count: u32,
        at: i64,
    },
    DailyGameStarted {
        game_id: DailyGameId,
        player_id: UserId,
        date: NaiveDate,
        attempt: u32,
        at: i64,
    },
    DailyQuestionAnswered {
        game_id: DailyGameId,
        player_id: UserId,
        question_id: QuestionId,
        question_index: u32,
        at: i64,
    },
    DailyGameCompleted {
        game_id: DailyGameId,
        player_id: UserId,
        date: NaiveDate,
        attempt: u32,
        base_score: u32,
        chest: ChestType,
        current_streak: u32,
        at: i64,
    },
    StreakMilestoneReached {
        player_id: UserId,
        streak_days: u32,
        at: i64,
    },
    ChestOpened {
        game_id: DailyGameId,
        player_id: UserId,
        chest: ChestType,
        coins: u32,
        at: i64,
    },
    PlayerJoinedQueue {
        player_id: UserId,
        mmr: i32,
        at: i64,
    },
    PlayerLeftQueue {
        player_id: UserId,
        at: i64,
    },
    DuelMatchCreated {
        match_id: DuelMatchId,
        player1_id: UserId,
        player2_id: UserId,
        at: i64,
    },
    DuelRoundCompleted {
        match_id: DuelMatchId,
        round: u32,
        player1_points: u32,
        player2_points: u32,
        timed_out: bool,
        at: i64,
    },
    DuelMatchCompleted {
        match_id: DuelMatchId,
        winner_id: Option<UserId>,
        player1_score: u32,
        player2_score: u32,
        player1_mmr_delta: i32,
        player2_mmr_delta: i32,
        forfeited_by: Option<UserId>,
        at: i64,
    },
    DuelMatchAbandoned {
        match_id: DuelMatchId,
        at: i64,
    },
    ChallengeSent {
        challenge_id: ChallengeId,
        challenger_id: UserId,
        challenged_id: Option<UserId>,
        kind: ChallengeKind,
        at: i64,
    },
    ChallengeAccepted {
        challenge_id: ChallengeId,
        challenger_id: UserId,
        challenged_id: UserId,
        match_id: DuelMatchId,
        at: i64,
    },
    ChallengeDeclined {
        challenge_id: ChallengeId,
        challenger_id: UserId,
        challenged_id: UserId,
        at: i64,
    },
    ChallengeExpired {
        challenge_id: ChallengeId,
        challenger_id: UserId,
        at: i64,
    },
    SeasonReset {
        player_id: UserId,
        previous_season_id: String,
        season_id: String,
        mmr: i32,
        at: i64,
    },
    ReferralCreated {
        referral_id: ReferralId,
        inviter_id: UserId,
        invitee_id: UserId,
        at: i64,
    },
    ReferralMilestoneReached {
        referral_id: ReferralId,
        inviter_id: UserId,
        invitee_id: UserId,
        milestone: Milestone,
        at: i64,
    },
    ReferralRewardClaimed {
        referral_id: ReferralId,
        player_id: UserId,
        milestone: Milestone,
        tickets: u32,
        coins: u32,
        at: i64,
    },
    UserRegistered {
        user_id: UserId,
        username: String,
        at: i64,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::QuizStarted { .. } => "quiz_started",
            DomainEvent::AnswerSubmitted { .. } => "answer_submitted",
            DomainEvent::QuizCompleted { .. } => "quiz_completed",
            DomainEvent::MarathonGameStarted { .. } => "marathon_game_started",
            DomainEvent::MarathonQuestionAnswered { .. } => "marathon_question_answered",
            DomainEvent::DifficultyIncreased { .. } => "difficulty_increased",
            DomainEvent::LifeLost { .. } => "life_lost",
            DomainEvent::ShieldConsumed { .. } => "shield_consumed",
            DomainEvent::HintUsed { .. } => "hint_used",
            DomainEvent::BonusUsed { .. } => "bonus_used",
            DomainEvent::ContinueUsed { .. } => "continue_used",
            DomainEvent::MarathonGameOver { .. } => "marathon_game_over",
            DomainEvent::MarathonGameFinished { .. } => "marathon_game_finished",
            DomainEvent::PersonalBestUpdated { .. } => "personal_best_updated",
            DomainEvent::DailyQuizCreated { .. } => "daily_quiz_created",
            DomainEvent::DailyGameStarted { .. } => "daily_game_started",
            DomainEvent::DailyQuestionAnswered { .. } => "daily_question_answered",
            DomainEvent::DailyGameCompleted { .. } => "daily_game_completed",
            DomainEvent::StreakMilestoneReached { .. } => "streak_milestone_reached",
            DomainEvent::ChestOpened { .. } => "chest_opened",
            DomainEvent::PlayerJoinedQueue { .. } => "player_joined_queue",
            DomainEvent::PlayerLeftQueue { .. } => "player_left_queue",
            DomainEvent::DuelMatchCreated { .. } => "duel_match_created",
            DomainEvent::DuelRoundCompleted { .. } => "duel_round_completed",
            DomainEvent::DuelMatchCompleted { .. } => "duel_match_completed",
            DomainEvent::DuelMatchAbandoned { .. } => "duel_match_abandoned",
            DomainEvent::ChallengeSent { .. } => "challenge_sent",
            DomainEvent::ChallengeAccepted { .. } => "challenge_accepted",
            DomainEvent::ChallengeDeclined { .. } => "challenge_declined",
            DomainEvent::ChallengeExpired { .. } => "challenge_expired",
            DomainEvent::SeasonReset { .. } => "season_reset",
            DomainEvent::ReferralCreated { .. } => "referral_created",
            DomainEvent::ReferralMilestoneReached { .. } => "referral_milestone_reached",
            DomainEvent::ReferralRewardClaimed { .. } => "referral_reward_claimed",
            DomainEvent::UserRegistered { .. } => "user_registered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = DomainEvent::StreakMilestoneReached {
            player_id: UserId::from_platform(5),
            streak_days: 7,
            at: 10,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["streak_days"], 7);
    }
}
