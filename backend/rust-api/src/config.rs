use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

/// Tunables of the assessment engine. Defaults are the reference values.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub hint_penalty_points: u32,
    pub hint_debounce_ms: u64,
    pub drift_refresh_secs: u64,
    pub tick_interval_ms: u64,
    pub registry_sweep_secs: u64,
    pub default_time_limit_seconds: u32,
    pub min_time_limit_seconds: u32,
    pub max_attempts_per_scenario: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hint_penalty_points: 5,
            hint_debounce_ms: 600,
            drift_refresh_secs: 120,
            tick_interval_ms: 1000,
            registry_sweep_secs: 60,
            default_time_limit_seconds: 900,
            min_time_limit_seconds: 60,
            max_attempts_per_scenario: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub storage: StorageBackend,
    pub content_file: Option<String>,
    pub engine: EngineSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Local .env first, then the repository root one
        if dotenvy::dotenv().is_err() {
            dotenvy::from_path("../../.env").ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP__)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "clinsim".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let storage = match settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE"))
            .unwrap_or_else(|_| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "mongo" | "mongodb" => StorageBackend::Mongo,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "unknown storage backend '{}'",
                    other
                )))
            }
        };

        let content_file = settings
            .get_string("storage.content_file")
            .or_else(|_| env::var("CONTENT_FILE"))
            .ok();

        let engine = Self::engine_settings(&settings);

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            bind_addr,
            storage,
            content_file,
            engine,
        })
    }

    fn engine_settings(settings: &config::Config) -> EngineSettings {
        let defaults = EngineSettings::default();
        let int = |key: &str, env_key: &str, default: u64| -> u64 {
            settings
                .get_int(key)
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .or_else(|| env::var(env_key).ok().and_then(|v| v.parse::<u64>().ok()))
                .unwrap_or(default)
        };

        EngineSettings {
            hint_penalty_points: int(
                "engine.hint_penalty_points",
                "HINT_PENALTY_POINTS",
                defaults.hint_penalty_points as u64,
            ) as u32,
            hint_debounce_ms: int(
                "engine.hint_debounce_ms",
                "HINT_DEBOUNCE_MS",
                defaults.hint_debounce_ms,
            ),
            drift_refresh_secs: int(
                "engine.drift_refresh_secs",
                "DRIFT_REFRESH_SECONDS",
                defaults.drift_refresh_secs,
            )
            .max(1),
            tick_interval_ms: int(
                "engine.tick_interval_ms",
                "TICK_INTERVAL_MS",
                defaults.tick_interval_ms,
            )
            .max(1),
            registry_sweep_secs: int(
                "engine.registry_sweep_secs",
                "REGISTRY_SWEEP_SECONDS",
                defaults.registry_sweep_secs,
            )
            .max(1),
            default_time_limit_seconds: int(
                "engine.default_time_limit_seconds",
                "DEFAULT_TIME_LIMIT_SECONDS",
                defaults.default_time_limit_seconds as u64,
            ) as u32,
            min_time_limit_seconds: int(
                "engine.min_time_limit_seconds",
                "MIN_TIME_LIMIT_SECONDS",
                defaults.min_time_limit_seconds as u64,
            ) as u32,
            max_attempts_per_scenario: int(
                "engine.max_attempts_per_scenario",
                "MAX_ATTEMPTS_PER_SCENARIO",
                defaults.max_attempts_per_scenario as u64,
            ) as u32,
        }
    }

    /// Configuration for in-process use (tests, embedding) with reference defaults.
    pub fn in_memory() -> Self {
        Config {
            mongo_uri: String::new(),
            redis_uri: String::new(),
            mongo_database: String::new(),
            bind_addr: "127.0.0.1:0".to_string(),
            storage: StorageBackend::Memory,
            content_file: None,
            engine: EngineSettings::default(),
        }
    }
}
