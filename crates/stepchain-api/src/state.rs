//! Application state wiring all services together.
//!
//! AppState holds the concrete repository and engine instances used by both
//! the CLI and the REST API. The engine is generic over repository/invoker
//! traits, but AppState pins it to the SQLite and gateway implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stepchain_core::engine::executor::PipelineExecutor;
use stepchain_core::engine::retry::BackoffPolicy;
use stepchain_infra::config::{load_global_config, resolve_api_key, resolve_data_dir};
use stepchain_infra::llm::OpenAiCompatInvoker;
use stepchain_infra::sqlite::execution::SqliteExecutionRepository;
use stepchain_infra::sqlite::pool::DatabasePool;
use stepchain_infra::sqlite::workflow::SqliteWorkflowRepository;
use stepchain_types::config::{GlobalConfig, ModelRegistry};

/// Concrete executor type pinned to the infra implementations.
pub type ConcreteExecutor = PipelineExecutor<SqliteExecutionRepository, OpenAiCompatInvoker>;

/// Shared application state holding repositories and the engine.
///
/// Used by both CLI commands and REST API handlers. The observer-facing
/// repositories read the same store the engine writes, so status reads never
/// touch the engine itself.
#[derive(Clone)]
pub struct AppState {
    pub workflow_repo: Arc<SqliteWorkflowRepository>,
    pub execution_repo: Arc<SqliteExecutionRepository>,
    pub executor: Arc<ConcreteExecutor>,
    pub registry: Arc<ModelRegistry>,
    pub config: GlobalConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: connect to the DB, load config,
    /// wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        // Initialize database
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("stepchain.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        // Load configuration and build the read-only model registry
        let config = load_global_config(&data_dir).await;
        let registry = Arc::new(ModelRegistry::with_overrides(&config.models));

        // Wire the model gateway client
        let api_key = resolve_api_key(&config);
        let invoker = Arc::new(OpenAiCompatInvoker::new(
            config.gateway_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )?);

        // The engine owns its own repository handle; observer reads go
        // through execution_repo directly
        let executor = Arc::new(PipelineExecutor::new(
            SqliteExecutionRepository::new(db_pool.clone()),
            invoker,
            Arc::clone(&registry),
            BackoffPolicy::from_config(&config.backoff),
            config.max_output_tokens,
        ));

        Ok(Self {
            workflow_repo: Arc::new(SqliteWorkflowRepository::new(db_pool.clone())),
            execution_repo: Arc::new(SqliteExecutionRepository::new(db_pool.clone())),
            executor,
            registry,
            config,
            data_dir,
            db_pool,
        })
    }
}
