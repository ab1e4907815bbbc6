use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::metrics::{record_answer, DAILY_CHALLENGES_COMPLETED_TOTAL};
use crate::models::daily::{DAILY_QUESTION_COUNT, MAX_ATTEMPTS, RETRY_COST_COINS};
use crate::models::dto::{
    leaderboard_limit, ChestOpenResponse, DailyAnswerResponse, DailyGameView, DailyLeaderboard,
    DailyLeaderboardEntry, DailyStatusView, StreakView,
};
use crate::models::{
    AnswerId, DailyGame, DailyGameId, DailyQuiz, DomainEvent, PaymentMethod, Question,
    QuestionId, StreakState, UserId,
};
use crate::services::event_bus::EventBus;
use crate::services::question_selector::QuestionSelector;
use crate::services::repositories::{
    best_per_player, DailyGameRepository, DailyQuizRepository, QuestionRepository, Repositories,
    ScoreRow,
};
use crate::services::user_service::UserService;
use crate::utils::time::{seconds_until_next_day, Clock};

pub struct DailyChallengeService {
    quizzes: Arc<dyn DailyQuizRepository>,
    games: Arc<dyn DailyGameRepository>,
    questions: Arc<dyn QuestionRepository>,
    selector: QuestionSelector,
    users: UserService,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl DailyChallengeService {
    pub fn new(
        repos: &Repositories,
        users: UserService,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quizzes: repos.daily_quizzes.clone(),
            games: repos.daily_games.clone(),
            questions: repos.questions.clone(),
            selector: QuestionSelector::new(repos.questions.clone()),
            users,
            events,
            clock,
        }
    }

    /// The frozen question set of `date`, drawn from the bank on first request.
    pub async fn get_or_create_daily_quiz(&self, date: NaiveDate) -> DomainResult<DailyQuiz> {
        if let Some(quiz) = self.quizzes.find_by_date(date).await? {
            return Ok(quiz);
        }

        let now = self.clock.now();
        let ids = self.selector.select_random_ids(DAILY_QUESTION_COUNT).await?;
        let quiz = DailyQuiz::new(date, ids, now)?;
        if let Err(e) = self.quizzes.save(&quiz).await {
            // another request created the day's quiz first
            if let Some(existing) = self.quizzes.find_by_date(date).await? {
                return Ok(existing);
            }
            return Err(e);
        }

        tracing::info!("Created daily quiz {} for {}", quiz.id, date);
        self.events.publish(DomainEvent::DailyQuizCreated {
            daily_quiz_id: quiz.id,
            date,
            question_count: quiz.question_ids.len() as u32,
            at: now,
        });
        Ok(quiz)
    }

    /// Starts today's first attempt, or resumes the attempt in progress.
    pub async fn start(&self, player_id: &UserId) -> DomainResult<DailyGameView> {
        let today = self.clock.today();
        let quiz = self.get_or_create_daily_quiz(today).await?;
        let played = self.games.find_by_player_and_date(player_id, today).await?;

        if let Some(game) = played.iter().find(|g| !g.status().is_terminal()) {
            tracing::debug!("Resuming daily game {} for {}", game.id(), player_id);
            return self.view(game).await;
        }
        if !played.is_empty() {
            return Err(DomainError::conflict(
                "today's challenge was already played, use retry for another attempt",
            ));
        }

        let streak = self.carried_streak(player_id, today).await?;
        let now = self.clock.now();
        let mut game = DailyGame::start(player_id.clone(), &quiz, streak, now)?;
        self.persist(&mut game).await?;
        tracing::info!("Daily game {} started for {} on {}", game.id(), player_id, today);
        self.view(&game).await
    }

    pub async fn submit_answer(
        &self,
        player_id: &UserId,
        game_id: DailyGameId,
        question_id: QuestionId,
        answer_id: AnswerId,
        time_taken_ms: i64,
    ) -> DomainResult<DailyAnswerResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let question = self.question(question_id).await?;
        let now = self.clock.now();

        let completed = game.submit_answer(&question, answer_id, time_taken_ms, now)?;
        let is_correct = game
            .session()
            .user_answers
            .last()
            .is_some_and(|a| a.is_correct);
        record_answer("daily", is_correct);

        if completed {
            let rank = self.rank_with(&game).await?;
            if let Some(rank) = rank {
                game.set_rank(rank);
            }
            let chest = game
                .chest()
                .map(|c| format!("{:?}", c.chest_type).to_lowercase())
                .unwrap_or_default();
            DAILY_CHALLENGES_COMPLETED_TOTAL
                .with_label_values(&[&game.attempt_number().to_string(), &chest])
                .inc();
            tracing::info!(
                "Daily game {} completed by {} with {} points",
                game.id(),
                player_id,
                game.base_score()
            );
        }

        self.persist(&mut game).await?;
        Ok(DailyAnswerResponse {
            question_index: game.session().current_question_index,
            is_completed: completed,
            game: self.view(&game).await?,
        })
    }

    /// Opens the next attempt on today's set; only the latest finished attempt can be retried.
    pub async fn retry(
        &self,
        player_id: &UserId,
        game_id: DailyGameId,
        payment: PaymentMethod,
    ) -> DomainResult<DailyGameView> {
        let game = self.load_owned(player_id, game_id).await?;
        let today = self.clock.today();
        if game.date() != today {
            return Err(DomainError::not_available("that daily challenge is over"));
        }

        let played = self.games.find_by_player_and_date(player_id, today).await?;
        let latest = played
            .iter()
            .max_by_key(|g| g.attempt_number())
            .unwrap_or(&game);
        if latest.id() != game.id() {
            return Err(DomainError::conflict("only the latest attempt can be retried"));
        }

        let now = self.clock.now();
        let mut next = game.retry(now)?;
        if payment == PaymentMethod::Coins {
            self.users.debit_coins(player_id, RETRY_COST_COINS).await?;
        }
        if let Err(e) = self.persist(&mut next).await {
            if payment == PaymentMethod::Coins {
                tracing::warn!("Refunding daily retry of {} after failed save: {}", player_id, e);
                self.users.credit_coins(player_id, RETRY_COST_COINS).await?;
            }
            return Err(e);
        }
        tracing::info!(
            "Daily attempt {} started by {} via {}",
            next.attempt_number(),
            player_id,
            payment.as_str()
        );
        self.view(&next).await
    }

    /// Credits the chest once; later calls report the same reward.
    pub async fn open_chest(
        &self,
        player_id: &UserId,
        game_id: DailyGameId,
    ) -> DomainResult<ChestOpenResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();
        let (chest, newly_opened) = game.open_chest(now)?;

        let wallet = if newly_opened {
            self.persist(&mut game).await?;
            self.users.credit_coins(player_id, chest.coins).await?
        } else {
            self.users.wallet(player_id).await?
        };

        Ok(ChestOpenResponse {
            chest_type: chest.chest_type,
            coins: chest.coins,
            newly_opened,
            coins_balance: wallet.coins,
        })
    }

    pub async fn status(&self, player_id: &UserId) -> DomainResult<DailyStatusView> {
        let today = self.clock.today();
        let quiz = self.get_or_create_daily_quiz(today).await?;
        let played = self.games.find_by_player_and_date(player_id, today).await?;
        let players: HashSet<UserId> = self
            .games
            .find_by_date(today)
            .await?
            .iter()
            .map(|g| g.player_id().clone())
            .collect();

        let latest = played.iter().max_by_key(|g| g.attempt_number());
        let game = match latest {
            Some(game) => Some(self.view(game).await?),
            None => None,
        };
        let attempts_used = played.len() as u32;

        Ok(DailyStatusView {
            date: today,
            daily_quiz_id: quiz.id,
            game,
            attempts_used,
            attempts_left: MAX_ATTEMPTS.saturating_sub(attempts_used),
            retry_cost_coins: RETRY_COST_COINS,
            time_to_reset_secs: seconds_until_next_day(self.clock.now()),
            total_players: players.len() as u32,
        })
    }

    pub async fn streak(&self, player_id: &UserId) -> DomainResult<StreakView> {
        let today = self.clock.today();
        let tomorrow = today
            .succ_opt()
            .ok_or_else(|| DomainError::internal("calendar overflow"))?;
        let streak = self
            .games
            .find_last_completed_first_attempt(player_id, tomorrow)
            .await?
            .map(|g| g.streak())
            .unwrap_or_default();
        Ok(StreakView::new(streak, today))
    }

    pub async fn leaderboard(
        &self,
        date: Option<NaiveDate>,
        limit: Option<usize>,
        caller: Option<&UserId>,
    ) -> DomainResult<DailyLeaderboard> {
        let date = date.unwrap_or_else(|| self.clock.today());
        let limit = leaderboard_limit(limit);
        let games = self.games.find_by_date(date).await?;

        let ranked = best_per_player(completed_rows(&games), usize::MAX);
        let player_rank = caller.and_then(|id| {
            ranked
                .iter()
                .position(|row| &row.user_id == id)
                .map(|i| i as u32 + 1)
        });
        let total_players = ranked.len() as u32;

        let top: Vec<ScoreRow> = ranked.into_iter().take(limit).collect();
        let ids: Vec<UserId> = top.iter().map(|row| row.user_id.clone()).collect();
        let names = self.users.display_names(&ids).await?;
        let entries = top
            .into_iter()
            .enumerate()
            .map(|(i, row)| DailyLeaderboardEntry {
                rank: i as u32 + 1,
                username: names.get(&row.user_id).cloned().unwrap_or_default(),
                player_id: row.user_id,
                base_score: row.score,
                finished_at: row.achieved_at,
            })
            .collect();

        Ok(DailyLeaderboard {
            date,
            total_players,
            player_rank,
            entries,
        })
    }

    async fn carried_streak(&self, player_id: &UserId, today: NaiveDate) -> DomainResult<StreakState> {
        Ok(self
            .games
            .find_last_completed_first_attempt(player_id, today)
            .await?
            .map(|g| g.streak())
            .unwrap_or_default())
    }

    /// Rank of the freshly completed game among the day's best scores.
    async fn rank_with(&self, game: &DailyGame) -> DomainResult<Option<u32>> {
        let mut games: Vec<DailyGame> = self
            .games
            .find_by_date(game.date())
            .await?
            .into_iter()
            .filter(|g| g.id() != game.id())
            .collect();
        games.push(game.clone());
        let ranked = best_per_player(completed_rows(&games), usize::MAX);
        Ok(ranked
            .iter()
            .position(|row| &row.user_id == game.player_id())
            .map(|i| i as u32 + 1))
    }

    async fn load_owned(&self, player_id: &UserId, game_id: DailyGameId) -> DomainResult<DailyGame> {
        let game = self
            .games
            .find_by_id(game_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("daily game {}", game_id)))?;
        if game.player_id() != player_id {
            tracing::warn!("Player {} tried to access daily game {}", player_id, game_id);
            return Err(DomainError::unauthorized("daily game belongs to another player"));
        }
        Ok(game)
    }

    async fn question(&self, question_id: QuestionId) -> DomainResult<Question> {
        self.questions
            .find_by_id(question_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("question {}", question_id)))
    }

    async fn view(&self, game: &DailyGame) -> DomainResult<DailyGameView> {
        let current = match game.current_question_id() {
            Some(id) if !game.status().is_terminal() => Some(self.question(id).await?),
            _ => None,
        };
        Ok(DailyGameView::new(game, current.as_ref(), self.clock.today()))
    }

    async fn persist(&self, game: &mut DailyGame) -> DomainResult<()> {
        self.games.save(game).await?;
        self.events.publish_all(game.take_events());
        Ok(())
    }
}

fn completed_rows(games: &[DailyGame]) -> Vec<ScoreRow> {
    games
        .iter()
        .filter(|g| g.status().is_terminal())
        .map(|g| ScoreRow {
            user_id: g.player_id().clone(),
            score: g.base_score(),
            achieved_at: g.finished_at().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::{ChestType, QuestionDifficulty};
    use crate::services::event_bus::RecordingEventBus;
    use crate::services::repositories::memory::InMemoryStore;
    use crate::utils::time::ManualClock;

    // 2026-03-01T12:00:00Z
    const NOON: i64 = 1_772_366_400;
    const DAY: i64 = 86_400;

    struct Fixture {
        service: DailyChallengeService,
        store: Arc<InMemoryStore>,
        events: Arc<RecordingEventBus>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        for _ in 0..12 {
            QuestionRepository::save(
                store.as_ref(),
                &fixtures::question_with_points(QuestionDifficulty::Easy, 10),
            )
            .await
            .unwrap();
        }
        let repos = Repositories::from_store(store.clone());
        let events = Arc::new(RecordingEventBus::new());
        let clock = Arc::new(ManualClock::starting_at(NOON));
        let users = UserService::new(
            repos.users.clone(),
            repos.wallets.clone(),
            events.clone(),
            clock.clone(),
        );
        let service = DailyChallengeService::new(&repos, users, events.clone(), clock.clone());
        Fixture {
            service,
            store,
            events,
            clock,
        }
    }

    async fn play(f: &Fixture, player: &UserId, game_id: DailyGameId, correct: usize) -> DailyAnswerResponse {
        let mut last = None;
        for i in 0..DAILY_QUESTION_COUNT {
            let game = DailyGameRepository::find_by_id(f.store.as_ref(), game_id)
                .await
                .unwrap()
                .unwrap();
            let question_id = game.current_question_id().unwrap();
            let question = QuestionRepository::find_by_id(f.store.as_ref(), question_id)
                .await
                .unwrap()
                .unwrap();
            let answer = if i < correct {
                fixtures::correct(&question)
            } else {
                fixtures::wrong(&question)
            };
            last = Some(
                f.service
                    .submit_answer(player, game_id, question_id, answer, 1_500)
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_daily_quiz_is_shared_by_the_day() {
        let f = fixture().await;
        let today = f.clock.today();
        let first = f.service.get_or_create_daily_quiz(today).await.unwrap();
        let again = f.service.get_or_create_daily_quiz(today).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.question_ids.len(), 10);
        assert_eq!(f.events.event_types(), vec!["daily_quiz_created"]);
    }

    #[tokio::test]
    async fn test_score_is_hidden_until_completion() {
        let f = fixture().await;
        let player = UserId::from_platform(1);
        let view = f.service.start(&player).await.unwrap();
        assert!(view.current_question.is_some());
        assert!(view.base_score.is_none());

        let resumed = f.service.start(&player).await.unwrap();
        assert_eq!(resumed.game_id, view.game_id);

        let done = play(&f, &player, view.game_id, 8).await;
        assert!(done.is_completed);
        assert_eq!(done.game.base_score, Some(80));
        assert_eq!(
            done.game.chest.map(|c| c.chest_type),
            Some(ChestType::Silver)
        );
        assert_eq!(done.game.rank, Some(1));
        assert_eq!(done.game.streak.current_streak, 1);

        let err = f.service.start(&player).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_chest_credits_wallet_once() {
        let f = fixture().await;
        let player = UserId::from_platform(2);
        let game_id = f.service.start(&player).await.unwrap().game_id;
        play(&f, &player, game_id, 10).await;

        let first = f.service.open_chest(&player, game_id).await.unwrap();
        assert!(first.newly_opened);
        assert_eq!(first.chest_type, ChestType::Diamond);
        assert_eq!(first.coins_balance, 700);

        let second = f.service.open_chest(&player, game_id).await.unwrap();
        assert!(!second.newly_opened);
        assert_eq!(second.coins, 200);
        assert_eq!(second.coins_balance, 700);
    }

    #[tokio::test]
    async fn test_retry_costs_coins_and_keeps_streak() {
        let f = fixture().await;
        let player = UserId::from_platform(3);
        let first = f.service.start(&player).await.unwrap().game_id;
        play(&f, &player, first, 3).await;

        let second = f
            .service
            .retry(&player, first, PaymentMethod::Coins)
            .await
            .unwrap();
        assert_eq!(second.attempt_number, 2);
        assert_eq!(f.service.users.wallet(&player).await.unwrap().coins, 400);

        let err = f
            .service
            .retry(&player, first, PaymentMethod::Ad)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StateViolation(_) | DomainError::Conflict(_)));

        play(&f, &player, second.game_id, 9).await;
        let third = f
            .service
            .retry(&player, second.game_id, PaymentMethod::Ad)
            .await
            .unwrap();
        play(&f, &player, third.game_id, 1).await;
        let err = f
            .service
            .retry(&player, third.game_id, PaymentMethod::Ad)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ExhaustedResource(_)));

        let board = f.service.leaderboard(None, None, Some(&player)).await.unwrap();
        assert_eq!(board.entries[0].base_score, 90);
        assert_eq!(board.player_rank, Some(1));

        let streak = f.service.streak(&player).await.unwrap();
        assert_eq!(streak.current_streak, 1);
    }

    #[tokio::test]
    async fn test_streak_rolls_over_days() {
        let f = fixture().await;
        let player = UserId::from_platform(4);
        for _ in 0..2 {
            let game_id = f.service.start(&player).await.unwrap().game_id;
            play(&f, &player, game_id, 5).await;
            f.clock.advance(DAY);
        }
        assert_eq!(f.service.streak(&player).await.unwrap().current_streak, 2);

        f.clock.advance(DAY);
        assert_eq!(f.service.streak(&player).await.unwrap().current_streak, 0);
        let game_id = f.service.start(&player).await.unwrap().game_id;
        let done = play(&f, &player, game_id, 5).await;
        assert_eq!(done.game.streak.current_streak, 1);
        assert_eq!(done.game.streak.best_streak, 2);
    }

    #[tokio::test]
    async fn test_leaderboard_keeps_best_attempt_per_player() {
        let f = fixture().await;
        let alice = UserId::from_platform(10);
        let bob = UserId::from_platform(11);

        let a1 = f.service.start(&alice).await.unwrap().game_id;
        play(&f, &alice, a1, 6).await;
        let b1 = f.service.start(&bob).await.unwrap().game_id;
        play(&f, &bob, b1, 7).await;
        let a2 = f
            .service
            .retry(&alice, a1, PaymentMethod::Ad)
            .await
            .unwrap()
            .game_id;
        play(&f, &alice, a2, 9).await;

        let board = f.service.leaderboard(None, Some(10), Some(&bob)).await.unwrap();
        let scores: Vec<(UserId, u32)> = board
            .entries
            .iter()
            .map(|e| (e.player_id.clone(), e.base_score))
            .collect();
        assert_eq!(scores, vec![(alice, 90), (bob.clone(), 70)]);
        assert_eq!(board.player_rank, Some(2));
        assert_eq!(board.total_players, 2);

        let status = f.service.status(&bob).await.unwrap();
        assert_eq!(status.total_players, 2);
        assert_eq!(status.attempts_left, 2);
    }

    /// Delegates to the store until `fail_saves` is set.
    struct FlakyGames {
        inner: Arc<InMemoryStore>,
        fail_saves: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl DailyGameRepository for FlakyGames {
        async fn save(&self, game: &DailyGame) -> DomainResult<()> {
            if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DomainError::Storage("write refused".into()));
            }
            DailyGameRepository::save(self.inner.as_ref(), game).await
        }

        async fn find_by_id(&self, id: DailyGameId) -> DomainResult<Option<DailyGame>> {
            DailyGameRepository::find_by_id(self.inner.as_ref(), id).await
        }

        async fn find_by_player_and_date(
            &self,
            player_id: &UserId,
            date: NaiveDate,
        ) -> DomainResult<Vec<DailyGame>> {
            self.inner.find_by_player_and_date(player_id, date).await
        }

        async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Vec<DailyGame>> {
            DailyGameRepository::find_by_date(self.inner.as_ref(), date).await
        }

        async fn find_last_completed_first_attempt(
            &self,
            player_id: &UserId,
            before: NaiveDate,
        ) -> DomainResult<Option<DailyGame>> {
            self.inner
                .find_last_completed_first_attempt(player_id, before)
                .await
        }
    }

    #[tokio::test]
    async fn test_retry_refunds_coins_when_the_attempt_cannot_be_saved() {
        let f = fixture().await;
        let games = Arc::new(FlakyGames {
            inner: f.store.clone(),
            fail_saves: std::sync::atomic::AtomicBool::new(false),
        });
        let mut repos = Repositories::from_store(f.store.clone());
        repos.daily_games = games.clone();
        let service = DailyChallengeService::new(
            &repos,
            f.service.users.clone(),
            f.events.clone(),
            f.clock.clone(),
        );

        let player = UserId::from_platform(5);
        let first = service.start(&player).await.unwrap().game_id;
        play(&f, &player, first, 4).await;

        games
            .fail_saves
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = service
            .retry(&player, first, PaymentMethod::Coins)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));
        assert_eq!(service.users.wallet(&player).await.unwrap().coins, 500);
        let attempts = DailyGameRepository::find_by_player_and_date(
            f.store.as_ref(),
            &player,
            f.clock.today(),
        )
        .await
        .unwrap();
        assert_eq!(attempts.len(), 1);
    }
}
