use anyhow::Context;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{Config, StorageBackend};
use crate::services::daily_service::DailyChallengeService;
use crate::services::duel_coordinator::DuelHub;
use crate::services::duel_service::DuelService;
use crate::services::event_bus::{AsyncEventBus, EventBus};
use crate::services::marathon_service::MarathonService;
use crate::services::matchmaking::{InMemoryQueue, MatchmakingQueue, RedisQueue};
use crate::services::quiz_import::{QuizExporter, QuizImporter};
use crate::services::quiz_service::QuizService;
use crate::services::repositories::mongo::MongoStore;
use crate::services::repositories::Repositories;
use crate::services::user_service::UserService;
use crate::utils::time::{Clock, SystemClock};

pub mod daily_service;
pub mod duel_coordinator;
pub mod duel_progress;
pub mod duel_service;
pub mod event_bus;
pub mod marathon_service;
pub mod matchmaking;
pub mod question_selector;
pub mod quiz_import;
pub mod quiz_service;
pub mod repositories;
pub mod user_service;

const MATCHMAKER_INTERVAL: Duration = Duration::from_secs(1);

pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub events: Arc<dyn EventBus>,
    pub matchmaking: Arc<dyn MatchmakingQueue>,
    pub duel_hub: DuelHub,
    pub clock: Arc<dyn Clock>,
    /// Set when running on MongoDB; used by the health check.
    pub mongo: Option<Arc<MongoStore>>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Connects the configured backends.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events: Arc<dyn EventBus> = Arc::new(AsyncEventBus::with_default_handlers());

        let (repos, mongo) = match config.storage_backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                (Repositories::in_memory(), None)
            }
            StorageBackend::Mongo => {
                tracing::info!("Connecting to MongoDB...");
                let client = MongoClient::with_uri_str(&config.mongo_uri)
                    .await
                    .context("Failed to create MongoDB client")?;
                let store = Arc::new(MongoStore::new(client.database(&config.mongo_database)));
                store.ping().await.context("MongoDB ping failed")?;
                store
                    .ensure_indexes()
                    .await
                    .context("Failed to create MongoDB indexes")?;
                tracing::info!("MongoDB connection established successfully");
                (Repositories::from_store(store.clone()), Some(store))
            }
        };

        let (matchmaking, redis): (Arc<dyn MatchmakingQueue>, _) = match config.redis_uri.as_deref() {
            Some(uri) => {
                let conn = connect_redis(uri).await?;
                (Arc::new(RedisQueue::new(conn.clone())), Some(conn))
            }
            None => {
                tracing::info!("REDIS_URI not set, using in-memory matchmaking queue");
                (Arc::new(InMemoryQueue::new()), None)
            }
        };

        let mut state = Self::with_parts(config, repos, events, matchmaking, clock);
        state.mongo = mongo;
        state.redis = redis;
        Ok(state)
    }

    /// State over in-memory stores, used by tests and offline tools.
    pub fn in_memory(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(
            config,
            Repositories::in_memory(),
            Arc::new(AsyncEventBus::with_default_handlers()),
            Arc::new(InMemoryQueue::new()),
            clock,
        )
    }

    pub fn with_parts(
        config: Config,
        repos: Repositories,
        events: Arc<dyn EventBus>,
        matchmaking: Arc<dyn MatchmakingQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let duel_hub = DuelHub::new(&repos, events.clone(), clock.clone());
        Self {
            config,
            repos,
            events,
            matchmaking,
            duel_hub,
            clock,
            mongo: None,
            redis: None,
        }
    }

    pub fn user_service(&self) -> UserService {
        UserService::new(
            self.repos.users.clone(),
            self.repos.wallets.clone(),
            self.events.clone(),
            self.clock.clone(),
        )
        .with_starting_balance(self.config.starting_coins, self.config.starting_tickets)
    }

    pub fn marathon_service(&self) -> MarathonService {
        MarathonService::new(&self.repos, self.user_service(), self.events.clone(), self.clock.clone())
    }

    pub fn daily_service(&self) -> DailyChallengeService {
        DailyChallengeService::new(&self.repos, self.user_service(), self.events.clone(), self.clock.clone())
    }

    pub fn duel_service(&self) -> DuelService {
        DuelService::new(
            &self.repos,
            self.user_service(),
            self.matchmaking.clone(),
            self.events.clone(),
            self.clock.clone(),
            self.config.bot_username.clone(),
        )
    }

    pub fn quiz_service(&self) -> QuizService {
        QuizService::new(&self.repos, self.user_service(), self.events.clone(), self.clock.clone())
    }

    pub fn quiz_importer(&self) -> QuizImporter {
        QuizImporter::new(&self.repos, self.clock.clone())
    }

    pub fn quiz_exporter(&self) -> QuizExporter {
        QuizExporter::new(&self.repos, self.clock.clone())
    }

    /// Imports the configured seed directory, if any.
    pub async fn seed_content(&self) -> anyhow::Result<()> {
        let Some(dir) = self.config.seed_dir.as_deref() else {
            return Ok(());
        };
        self.quiz_importer()
            .seed_from_dir(Path::new(dir))
            .await
            .with_context(|| format!("Failed to seed quizzes from {}", dir))?;
        Ok(())
    }

    /// Pairs waiting players every second until the runtime shuts down.
    pub fn spawn_matchmaker(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MATCHMAKER_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match state.duel_service().sweep_queue().await {
                    Ok(created) if !created.is_empty() => {
                        tracing::debug!("Matchmaker paired {} match(es)", created.len());
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Matchmaker sweep failed: {}", e),
                }
            }
        })
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri).context("Invalid REDIS_URI")?;

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}
