use crate::clock::{DriftCorrector, RedisServerClock, ServerClock, SystemClock};
use crate::config::{Config, EngineSettings, StorageBackend};
use crate::storage::{
    mongo, AnswerStore, AttemptStore, HintUsageStore, MemoryAnswerStore, MemoryAttemptStore,
    MemoryContentProvider, MemoryHintStore, MongoAnswerStore, MongoAttemptStore,
    MongoContentProvider, RedisHintStore, ScenarioContentProvider,
};
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

pub mod answer_service;
pub mod attempt_session;
pub mod countdown;
pub mod finalizer;
pub mod hint_service;
pub mod question_timers;
pub mod reconciliation;
pub mod session_service;

use session_service::SessionService;

/// Collaborators shared by every attempt.
#[derive(Clone)]
pub struct Engine {
    pub attempts: Arc<dyn AttemptStore>,
    pub answers: Arc<dyn AnswerStore>,
    pub hints: Arc<dyn HintUsageStore>,
    pub content: Arc<dyn ScenarioContentProvider>,
    pub clock: Arc<DriftCorrector>,
    pub settings: EngineSettings,
}

pub struct AppState {
    pub config: Config,
    pub sessions: SessionService,
    pub clock: Arc<DriftCorrector>,
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// MongoDB for attempts and content, Redis for hint usage and server time.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        mongo::ensure_indexes(&mongo).await?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let clock = Self::drift_corrector(
            Arc::new(RedisServerClock::new(redis.clone())),
            &config.engine,
        );
        let engine = Engine {
            attempts: Arc::new(MongoAttemptStore::new(&mongo)),
            answers: Arc::new(MongoAnswerStore::new(&mongo)),
            hints: Arc::new(RedisHintStore::new(redis.clone())),
            content: Arc::new(MongoContentProvider::new(&mongo)),
            clock: clock.clone(),
            settings: config.engine.clone(),
        };

        Ok(Self {
            sessions: SessionService::new(engine),
            clock,
            config,
            mongo: Some(mongo),
            redis: Some(redis),
        })
    }

    /// Everything in process memory; the server clock is the local clock.
    pub fn in_memory(config: Config) -> anyhow::Result<Self> {
        let content = match &config.content_file {
            Some(path) => {
                tracing::info!("Loading scenario content from {}", path);
                MemoryContentProvider::from_json_file(path)?
            }
            None => {
                tracing::warn!("No CONTENT_FILE configured, scenarios will be empty");
                MemoryContentProvider::new()
            }
        };

        let clock = Self::drift_corrector(Arc::new(SystemClock), &config.engine);
        let engine = Engine {
            attempts: Arc::new(MemoryAttemptStore::new()),
            answers: Arc::new(MemoryAnswerStore::new()),
            hints: Arc::new(MemoryHintStore::new()),
            content: Arc::new(content),
            clock: clock.clone(),
            settings: config.engine.clone(),
        };

        Ok(Self::from_engine(config, engine))
    }

    pub fn from_engine(config: Config, engine: Engine) -> Self {
        Self {
            clock: engine.clock.clone(),
            sessions: SessionService::new(engine),
            config,
            mongo: None,
            redis: None,
        }
    }

    pub fn storage(&self) -> StorageBackend {
        self.config.storage
    }

    fn drift_corrector(server: Arc<dyn ServerClock>, settings: &EngineSettings) -> Arc<DriftCorrector> {
        Arc::new(DriftCorrector::new(
            server,
            Arc::new(SystemClock),
            Duration::from_secs(settings.drift_refresh_secs),
        ))
    }
}
