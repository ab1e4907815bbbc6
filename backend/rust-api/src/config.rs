use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Mongo,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self, config::ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            other => Err(config::ConfigError::Message(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub admin_api_key: Option<String>,
    pub telegram_bot_token: String,
    pub init_data_max_age_secs: i64,
    pub bot_username: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: Option<String>,
    pub seed_dir: Option<String>,
    pub starting_coins: u32,
    pub starting_tickets: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_origins: vec!["*".to_string()],
            admin_api_key: None,
            telegram_bot_token: "dev-bot-token-only-for-local-testing".to_string(),
            init_data_max_age_secs: 3600,
            bot_username: "quizsprintbot".to_string(),
            storage_backend: StorageBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "quizsprint".to_string(),
            redis_uri: None,
            seed_dir: None,
            starting_coins: 500,
            starting_tickets: 5,
        }
    }
}

fn lookup(settings: &config::Config, key: &str, vars: &[&str]) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| vars.iter().find_map(|name| env::var(name).ok()))
        .filter(|value| !value.trim().is_empty())
}

fn lookup_parsed<T: std::str::FromStr>(
    settings: &config::Config,
    key: &str,
    vars: &[&str],
    default: T,
) -> Result<T, config::ConfigError> {
    match lookup(settings, key, vars) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            config::ConfigError::Message(format!("{} has an invalid value '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, &app_env)
    }

    fn from_settings(settings: &config::Config, app_env: &str) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();

        let telegram_bot_token = match lookup(settings, "auth.telegram_bot_token", &["TELEGRAM_BOT_TOKEN"]) {
            Some(token) => token,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "TELEGRAM_BOT_TOKEN must be set in production".to_string(),
                ));
            }
            None => {
                tracing::warn!("Using default TELEGRAM_BOT_TOKEN (dev mode only!)");
                defaults.telegram_bot_token
            }
        };

        let cors_origins = lookup(settings, "server.cors_origins", &["CORS_ORIGINS"])
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let storage_backend = match lookup(settings, "storage.backend", &["STORAGE_BACKEND"]) {
            Some(raw) => StorageBackend::parse(&raw)?,
            None => defaults.storage_backend,
        };

        Ok(Config {
            port: lookup_parsed(settings, "server.port", &["PORT"], defaults.port)?,
            cors_origins,
            admin_api_key: lookup(settings, "auth.admin_api_key", &["ADMIN_API_KEY"]),
            telegram_bot_token,
            init_data_max_age_secs: lookup_parsed(
                settings,
                "auth.init_data_max_age_secs",
                &["INIT_DATA_MAX_AGE_SECS"],
                defaults.init_data_max_age_secs,
            )?,
            bot_username: lookup(settings, "duel.bot_username", &["BOT_USERNAME"])
                .unwrap_or(defaults.bot_username),
            storage_backend,
            mongo_uri: lookup(settings, "database.mongo_uri", &["MONGO_URI", "DATABASE_URL"])
                .unwrap_or(defaults.mongo_uri),
            mongo_database: lookup(settings, "database.mongo_database", &["MONGO_DATABASE"])
                .unwrap_or(defaults.mongo_database),
            redis_uri: lookup(settings, "redis.uri", &["REDIS_URI"]),
            seed_dir: lookup(settings, "content.seed_dir", &["QUIZ_SEED_DIR"]),
            starting_coins: lookup_parsed(
                settings,
                "economy.starting_coins",
                &["STARTING_COINS"],
                defaults.starting_coins,
            )?,
            starting_tickets: lookup_parsed(
                settings,
                "economy.starting_tickets",
                &["STARTING_TICKETS"],
                defaults.starting_tickets,
            )?,
        })
    }
}
