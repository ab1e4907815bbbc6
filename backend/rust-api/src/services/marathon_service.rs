use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::metrics::{record_answer, MARATHON_GAMES_TOTAL};
use crate::models::dto::{
    leaderboard_limit, AssistResponse, ContinueResponse, MarathonAnswerResponse, MarathonGameView,
    MarathonLeaderboard, MarathonLeaderboardEntry, PersonalBestView, TimeFrame,
};
use crate::models::marathon::AssistEffect;
use crate::models::{
    AnswerId, BonusType, CategoryScope, DomainEvent, HintType, MarathonGame, MarathonGameId,
    PaymentMethod, PersonalBest, QuestionId, UserId,
};
use crate::services::event_bus::EventBus;
use crate::services::question_selector::QuestionSelector;
use crate::services::repositories::{MarathonGameRepository, PersonalBestRepository, Repositories};
use crate::services::user_service::UserService;
use crate::utils::time::{day_start, Clock};

const DAY_SECS: i64 = 86_400;
const WEEK_SECS: i64 = 7 * DAY_SECS;

pub struct MarathonService {
    games: Arc<dyn MarathonGameRepository>,
    personal_bests: Arc<dyn PersonalBestRepository>,
    selector: QuestionSelector,
    users: UserService,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl MarathonService {
    pub fn new(
        repos: &Repositories,
        users: UserService,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            games: repos.marathon_games.clone(),
            personal_bests: repos.personal_bests.clone(),
            selector: QuestionSelector::new(repos.questions.clone()),
            users,
            events,
            clock,
        }
    }

    pub async fn start(
        &self,
        player_id: &UserId,
        category: Option<&str>,
    ) -> DomainResult<MarathonGameView> {
        let category = CategoryScope::parse(category)?;
        if let Some(active) = self.games.find_active_by_player(player_id).await? {
            tracing::warn!(
                "Player {} already has marathon game {} ({})",
                player_id,
                active.id(),
                active.status().as_str()
            );
            return Err(DomainError::conflict("an active marathon game already exists"));
        }

        let now = self.clock.now();
        let personal_best = self
            .personal_bests
            .find_by_player_and_category(player_id, category)
            .await?;
        let mut game = MarathonGame::new(
            player_id.clone(),
            category,
            personal_best.map(|pb| pb.best_streak()),
            now,
        )?;
        self.load_next_question(&mut game, now).await?;

        self.persist(&mut game, Vec::new()).await?;
        MARATHON_GAMES_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            "Marathon game {} started for {} in {}",
            game.id(),
            player_id,
            category
        );
        Ok(MarathonGameView::new(&game, now))
    }

    pub async fn answer(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
        question_id: QuestionId,
        answer_id: Option<AnswerId>,
        time_taken_ms: i64,
    ) -> DomainResult<MarathonAnswerResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();

        let outcome = game.answer_question(question_id, answer_id, time_taken_ms, now)?;
        record_answer("marathon", outcome.is_correct);

        let mut extra_events = Vec::new();
        if outcome.game_over {
            extra_events.extend(self.reconcile_personal_best(&game, now).await?);
            MARATHON_GAMES_TOTAL.with_label_values(&["game_over"]).inc();
            tracing::info!(
                "Marathon game {} over: streak {} score {}",
                game.id(),
                game.max_streak(),
                game.base_score()
            );
        } else if let Err(e) = self.load_next_question(&mut game, now).await {
            // the answer is kept; the next status call retries the pick
            tracing::error!("No successor question for game {}: {}", game.id(), e);
        }

        self.persist(&mut game, extra_events).await?;
        Ok(MarathonAnswerResponse {
            is_correct: outcome.is_correct,
            correct_answer_id: outcome.correct_answer_id,
            points_earned: outcome.points_earned,
            shield_consumed: outcome.shield_consumed,
            life_lost: outcome.life_lost,
            difficulty_changed: outcome.difficulty_changed,
            is_game_over: outcome.game_over,
            is_new_record: outcome.is_new_record,
            game: MarathonGameView::new(&game, now),
        })
    }

    pub async fn use_hint(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
        question_id: QuestionId,
        hint: HintType,
    ) -> DomainResult<AssistResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();
        let effect = game.use_hint(question_id, hint, now)?;
        self.finish_assist(game, effect, now).await
    }

    pub async fn use_bonus(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
        question_id: QuestionId,
        bonus: BonusType,
    ) -> DomainResult<AssistResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();
        let effect = game.use_bonus(question_id, bonus, now)?;
        self.finish_assist(game, effect, now).await
    }

    async fn finish_assist(
        &self,
        mut game: MarathonGame,
        effect: AssistEffect,
        now: i64,
    ) -> DomainResult<AssistResponse> {
        if matches!(effect, AssistEffect::Skip { .. }) {
            self.load_next_question(&mut game, now).await?;
        }
        self.persist(&mut game, Vec::new()).await?;
        Ok(AssistResponse {
            effect,
            game: MarathonGameView::new(&game, now),
        })
    }

    pub async fn continue_game(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
        payment: PaymentMethod,
    ) -> DomainResult<ContinueResponse> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();

        // the in-memory transition is dropped if payment fails
        let cost = game.continue_game(payment, now)?;
        self.load_next_question(&mut game, now).await?;
        let wallet = match payment {
            PaymentMethod::Coins => self.users.debit_coins(player_id, cost).await?,
            PaymentMethod::Ad => self.users.wallet(player_id).await?,
        };

        if let Err(e) = self.persist(&mut game, Vec::new()).await {
            if payment == PaymentMethod::Coins {
                tracing::warn!("Refunding continue of game {} after failed save: {}", game.id(), e);
                self.users.credit_coins(player_id, cost).await?;
            }
            return Err(e);
        }
        tracing::info!(
            "Marathon game {} continued via {} (cost {})",
            game.id(),
            payment.as_str(),
            cost
        );
        Ok(ContinueResponse {
            cost_coins: cost,
            coins_balance: wallet.coins,
            game: MarathonGameView::new(&game, now),
        })
    }

    pub async fn abandon(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
    ) -> DomainResult<MarathonGameView> {
        let mut game = self.load_owned(player_id, game_id).await?;
        let now = self.clock.now();
        game.abandon(now)?;
        let extra_events = self.reconcile_personal_best(&game, now).await?;

        self.persist(&mut game, extra_events.into_iter().collect()).await?;
        MARATHON_GAMES_TOTAL.with_label_values(&["finished"]).inc();
        tracing::info!(
            "Marathon game {} closed as {}",
            game.id(),
            game.status().as_str()
        );
        Ok(MarathonGameView::new(&game, now))
    }

    /// The player's active game, with a question reloaded if the last pick failed.
    pub async fn status(&self, player_id: &UserId) -> DomainResult<Option<MarathonGameView>> {
        let Some(mut game) = self.games.find_active_by_player(player_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        if game.ensure_in_progress().is_ok() && game.current_question().is_none() {
            self.load_next_question(&mut game, now).await?;
            self.persist(&mut game, Vec::new()).await?;
        }
        Ok(Some(MarathonGameView::new(&game, now)))
    }

    pub async fn personal_bests(&self, player_id: &UserId) -> DomainResult<Vec<PersonalBestView>> {
        let mut bests = self.personal_bests.find_by_player(player_id).await?;
        bests.sort_by(|a, b| a.rank_cmp(b));
        Ok(bests.iter().map(PersonalBestView::from).collect())
    }

    pub async fn leaderboard(
        &self,
        category: Option<&str>,
        limit: Option<usize>,
        time_frame: Option<&str>,
    ) -> DomainResult<MarathonLeaderboard> {
        let category = CategoryScope::parse(category)?;
        let time_frame = TimeFrame::parse(time_frame)?;
        let limit = leaderboard_limit(limit);
        let now = self.clock.now();

        // (player, streak, score, achieved_at)
        let rows: Vec<(UserId, u32, u32, i64)> = match time_frame {
            TimeFrame::AllTime => self
                .personal_bests
                .find_top_by_category(category, limit)
                .await?
                .into_iter()
                .map(|pb| {
                    (
                        pb.player_id().clone(),
                        pb.best_streak(),
                        pb.best_score(),
                        pb.achieved_at(),
                    )
                })
                .collect(),
            TimeFrame::Daily | TimeFrame::Weekly => {
                let start = match time_frame {
                    TimeFrame::Daily => day_start(self.clock.today()),
                    _ => now - WEEK_SECS,
                };
                let games = self
                    .games
                    .find_finished_between(category, start, now + 1)
                    .await?;
                best_finished_per_player(&games, limit)
            }
        };

        let ids: Vec<UserId> = rows.iter().map(|(id, ..)| id.clone()).collect();
        let names = self.users.display_names(&ids).await?;
        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(i, (player_id, streak, score, at))| MarathonLeaderboardEntry {
                rank: i as u32 + 1,
                username: names.get(&player_id).cloned().unwrap_or_default(),
                player_id,
                best_streak: streak,
                best_score: score,
                achieved_at: at,
            })
            .collect();

        Ok(MarathonLeaderboard {
            category,
            time_frame,
            entries,
        })
    }

    async fn load_owned(
        &self,
        player_id: &UserId,
        game_id: MarathonGameId,
    ) -> DomainResult<MarathonGame> {
        let game = self
            .games
            .find_by_id(game_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("marathon game {}", game_id)))?;
        if game.player_id() != player_id {
            tracing::warn!("Player {} tried to access marathon game {}", player_id, game_id);
            return Err(DomainError::unauthorized("marathon game belongs to another player"));
        }
        Ok(game)
    }

    async fn load_next_question(&self, game: &mut MarathonGame, now: i64) -> DomainResult<()> {
        let question = self
            .selector
            .select_next_question(game.category(), game.difficulty(), &game.recent_question_ids())
            .await?;
        game.load_question(question, now)
    }

    /// Creates or raises the personal best; returns the event to publish with the game.
    async fn reconcile_personal_best(
        &self,
        game: &MarathonGame,
        now: i64,
    ) -> DomainResult<Option<DomainEvent>> {
        if game.max_streak() == 0 {
            return Ok(None);
        }
        let existing = self
            .personal_bests
            .find_by_player_and_category(game.player_id(), game.category())
            .await?;

        let (best, previous_streak) = match existing {
            None => (
                PersonalBest::new(
                    game.player_id().clone(),
                    game.category(),
                    game.max_streak(),
                    game.base_score(),
                    now,
                )?,
                None,
            ),
            Some(mut best) => {
                let previous = best.best_streak();
                if !best.update_if_better(game.max_streak(), game.base_score(), now) {
                    return Ok(None);
                }
                (best, Some(previous))
            }
        };

        self.personal_bests.save(&best).await?;
        tracing::info!(
            "New personal best for {} in {}: streak {}",
            best.player_id(),
            best.category(),
            best.best_streak()
        );
        Ok(Some(DomainEvent::PersonalBestUpdated {
            player_id: best.player_id().clone(),
            category: best.category(),
            best_streak: best.best_streak(),
            best_score: best.best_score(),
            previous_streak,
            at: now,
        }))
    }

    async fn persist(
        &self,
        game: &mut MarathonGame,
        extra_events: Vec<DomainEvent>,
    ) -> DomainResult<()> {
        self.games.save(game).await?;
        self.events.publish_all(game.take_events());
        self.events.publish_all(extra_events);
        Ok(())
    }
}

/// Best finished run per player: streak desc, score desc, earliest finish.
fn best_finished_per_player(games: &[MarathonGame], limit: usize) -> Vec<(UserId, u32, u32, i64)> {
    let mut best: HashMap<UserId, (u32, u32, i64)> = HashMap::new();
    for game in games {
        let candidate = (
            game.max_streak(),
            game.base_score(),
            game.finished_at().unwrap_or(game.started_at()),
        );
        let better = match best.get(game.player_id()) {
            None => true,
            Some(&(streak, score, at)) => {
                (candidate.0, candidate.1, std::cmp::Reverse(candidate.2))
                    > (streak, score, std::cmp::Reverse(at))
            }
        };
        if better && candidate.0 > 0 {
            best.insert(game.player_id().clone(), candidate);
        }
    }

    let mut rows: Vec<(UserId, u32, u32, i64)> = best
        .into_iter()
        .map(|(id, (streak, score, at))| (id, streak, score, at))
        .collect();
    rows.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(b.2.cmp(&a.2))
            .then(a.3.cmp(&b.3))
            .then(a.0.cmp(&b.0))
    });
    rows.truncate(limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::{DifficultyLevel, MarathonStatus, QuestionDifficulty};
    use crate::services::event_bus::RecordingEventBus;
    use crate::services::repositories::memory::InMemoryStore;
    use crate::services::repositories::QuestionRepository;
    use crate::utils::time::ManualClock;

    struct Fixture {
        service: MarathonService,
        store: Arc<InMemoryStore>,
        events: Arc<RecordingEventBus>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        for difficulty in [
            QuestionDifficulty::Easy,
            QuestionDifficulty::Medium,
            QuestionDifficulty::Hard,
        ] {
            for _ in 0..30 {
                QuestionRepository::save(store.as_ref(), &fixtures::question(difficulty))
                    .await
                    .unwrap();
            }
        }
        let repos = Repositories::from_store(store.clone());
        let events = Arc::new(RecordingEventBus::new());
        let clock = Arc::new(ManualClock::starting_at(1_700_000_000));
        let users = UserService::new(
            repos.users.clone(),
            repos.wallets.clone(),
            events.clone(),
            clock.clone(),
        )
        .with_starting_balance(500, 5);
        let service = MarathonService::new(&repos, users, events.clone(), clock.clone());
        Fixture {
            service,
            store,
            events,
            clock,
        }
    }

    fn player() -> UserId {
        UserId::from_platform(11)
    }

    async fn current_question(f: &Fixture, game_id: MarathonGameId) -> crate::models::Question {
        MarathonGameRepository::find_by_id(f.store.as_ref(), game_id)
            .await
            .unwrap()
            .unwrap()
            .current_question()
            .cloned()
            .unwrap()
    }

    async fn answer(f: &Fixture, game_id: MarathonGameId, correct: bool) -> MarathonAnswerResponse {
        let q = current_question(f, game_id).await;
        let answer_id = if correct {
            fixtures::correct(&q)
        } else {
            fixtures::wrong(&q)
        };
        f.service
            .answer(&player(), game_id, q.id(), Some(answer_id), 2_000)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_loads_first_question() {
        let f = fixture().await;
        let view = f.service.start(&player(), None).await.unwrap();
        assert!(view.current_question.is_some());
        assert_eq!(view.time_limit, 15);
        assert_eq!(view.lives.current, 3);
        assert_eq!(f.events.event_types(), vec!["marathon_game_started"]);

        let err = f.service.start(&player(), None).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_six_correct_answers_reach_medium() {
        let f = fixture().await;
        let game_id = f.service.start(&player(), None).await.unwrap().game_id;

        let mut last = None;
        for _ in 0..6 {
            last = Some(answer(&f, game_id, true).await);
        }
        let last = last.unwrap();
        assert!(last.difficulty_changed);
        assert_eq!(last.game.current_streak, 6);
        assert_eq!(last.game.difficulty, DifficultyLevel::Medium);
        assert!(last.game.current_question.is_some());
        assert_eq!(
            f.events
                .event_types()
                .iter()
                .filter(|t| **t == "difficulty_increased")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_game_over_creates_personal_best_and_continue_charges_coins() {
        let f = fixture().await;
        let game_id = f.service.start(&player(), None).await.unwrap().game_id;
        answer(&f, game_id, true).await;
        answer(&f, game_id, true).await;
        answer(&f, game_id, false).await;
        answer(&f, game_id, false).await;
        let over = answer(&f, game_id, false).await;
        assert!(over.is_game_over);
        assert!(over.is_new_record);
        assert_eq!(over.game.status, MarathonStatus::GameOver);

        let bests = f.service.personal_bests(&player()).await.unwrap();
        assert_eq!(bests.len(), 1);
        assert_eq!(bests[0].best_streak, 2);
        assert!(f.events.event_types().contains(&"personal_best_updated"));

        let resumed = f
            .service
            .continue_game(&player(), game_id, PaymentMethod::Coins)
            .await
            .unwrap();
        assert_eq!(resumed.cost_coins, 200);
        assert_eq!(resumed.coins_balance, 300);
        assert_eq!(resumed.game.lives.current, 1);
        assert_eq!(resumed.game.continue_cost, 400);
        assert!(resumed.game.current_question.is_some());
    }

    #[tokio::test]
    async fn test_continue_requires_game_over_before_charging() {
        let f = fixture().await;
        let game_id = f.service.start(&player(), None).await.unwrap().game_id;
        let err = f
            .service
            .continue_game(&player(), game_id, PaymentMethod::Coins)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StateViolation(_)));
        let wallet = f.service.users.wallet(&player()).await.unwrap();
        assert_eq!(wallet.coins, 500);
    }

    #[tokio::test]
    async fn test_skip_hint_loads_successor() {
        let f = fixture().await;
        let view = f.service.start(&player(), None).await.unwrap();
        let first = view.current_question.unwrap().id;

        let response = f
            .service
            .use_hint(&player(), view.game_id, first, HintType::Skip)
            .await
            .unwrap();
        assert!(matches!(response.effect, AssistEffect::Skip { .. }));
        assert_eq!(response.game.question_index, 2);
        assert_ne!(response.game.current_question.unwrap().id, first);
        assert_eq!(response.game.current_streak, 0);
    }

    #[tokio::test]
    async fn test_other_players_cannot_touch_the_game() {
        let f = fixture().await;
        let game_id = f.service.start(&player(), None).await.unwrap().game_id;
        let err = f
            .service
            .abandon(&UserId::from_platform(99), game_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_weekly_leaderboard_uses_finished_games() {
        let f = fixture().await;
        let game_id = f.service.start(&player(), None).await.unwrap().game_id;
        answer(&f, game_id, true).await;
        answer(&f, game_id, true).await;
        answer(&f, game_id, true).await;
        f.clock.advance(60);
        f.service.abandon(&player(), game_id).await.unwrap();

        let weekly = f
            .service
            .leaderboard(None, None, Some("weekly"))
            .await
            .unwrap();
        assert_eq!(weekly.entries.len(), 1);
        assert_eq!(weekly.entries[0].best_streak, 3);
        assert_eq!(weekly.entries[0].username, "anonymous");

        let all_time = f.service.leaderboard(None, Some(5), None).await.unwrap();
        assert_eq!(all_time.entries[0].rank, 1);
        assert_eq!(all_time.entries[0].best_streak, 3);

        f.clock.advance(WEEK_SECS + 1);
        let stale = f
            .service
            .leaderboard(None, None, Some("weekly"))
            .await
            .unwrap();
        assert!(stale.entries.is_empty());
    }

    /// Delegates to the store until `fail_saves` is set.
    struct FlakyGames {
        inner: Arc<InMemoryStore>,
        fail_saves: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl MarathonGameRepository for FlakyGames {
        async fn save(&self, game: &MarathonGame) -> DomainResult<()> {
            if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DomainError::Storage("write refused".into()));
            }
            MarathonGameRepository::save(self.inner.as_ref(), game).await
        }

        async fn find_by_id(&self, id: MarathonGameId) -> DomainResult<Option<MarathonGame>> {
            MarathonGameRepository::find_by_id(self.inner.as_ref(), id).await
        }

        async fn find_active_by_player(
            &self,
            player_id: &UserId,
        ) -> DomainResult<Option<MarathonGame>> {
            MarathonGameRepository::find_active_by_player(self.inner.as_ref(), player_id)
                .await
        }

        async fn find_finished_between(
            &self,
            category: CategoryScope,
            start: i64,
            end: i64,
        ) -> DomainResult<Vec<MarathonGame>> {
            MarathonGameRepository::find_finished_between(self.inner.as_ref(), category, start, end)
                .await
        }
    }

    #[tokio::test]
    async fn test_continue_refunds_coins_when_the_game_cannot_be_saved() {
        let f = fixture().await;
        let games = Arc::new(FlakyGames {
            inner: f.store.clone(),
            fail_saves: std::sync::atomic::AtomicBool::new(false),
        });
        let mut repos = Repositories::from_store(f.store.clone());
        repos.marathon_games = games.clone();
        let service =
            MarathonService::new(&repos, f.service.users.clone(), f.events.clone(), f.clock.clone());

        let game_id = service.start(&player(), None).await.unwrap().game_id;
        for _ in 0..3 {
            let q = current_question(&f, game_id).await;
            service
                .answer(&player(), game_id, q.id(), Some(fixtures::wrong(&q)), 2_000)
                .await
                .unwrap();
        }

        games
            .fail_saves
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = service
            .continue_game(&player(), game_id, PaymentMethod::Coins)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Storage(_)));
        assert_eq!(service.users.wallet(&player()).await.unwrap().coins, 500);

        let stored = MarathonGameRepository::find_by_id(f.store.as_ref(), game_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), MarathonStatus::GameOver);
    }
}
