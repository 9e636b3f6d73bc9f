use std::sync::Arc;

use purser_agent::{AgentRuntime, DecisionEngine, RuntimeError, SettlementTerms};
use purser_core::config::AppConfig;
use purser_core::payment::ledger::LedgerClient;
use purser_core::payment::{PaymentExecutor, PaymentJournal, PaymentSettings};
use purser_db::{connect, migrations, DbPool, SessionStore, SqlSessionRepository};
use purser_evm::{EvmLedgerClient, EvmSetupError};
use thiserror::Error;
use tracing::info;

use crate::commands::Failure;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub ledger: Arc<EvmLedgerClient>,
    pub runtime: AgentRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Ledger(#[from] EvmSetupError),
}

impl From<BootstrapError> for Failure {
    fn from(value: BootstrapError) -> Self {
        match &value {
            BootstrapError::DatabaseConnect(_) => Failure::new("db_connectivity", value.to_string(), 4),
            BootstrapError::Migration(_) => Failure::new("migration", value.to_string(), 5),
            BootstrapError::Ledger(_) => Failure::new("ledger_setup", value.to_string(), 6),
        }
    }
}

impl From<RuntimeError> for Failure {
    fn from(value: RuntimeError) -> Self {
        match &value {
            RuntimeError::Domain(_) => Failure::new("invalid_input", value.to_string(), 7),
            RuntimeError::Store(_) | RuntimeError::Payment(_) => {
                Failure::new("persistence", value.to_string(), 8)
            }
        }
    }
}

/// Connects storage, applies migrations, and wires the negotiation runtime.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let ledger = Arc::new(EvmLedgerClient::from_config(&config.ledger)?);
    info!(
        event_name = "system.bootstrap.ledger_ready",
        chain_id = config.ledger.chain_id,
        can_sign = ledger.can_sign(),
        "ledger client configured"
    );

    let store = Arc::new(SessionStore::new(
        Arc::new(SqlSessionRepository::new(db_pool.clone())),
        config.memory.persist_retries,
    ));
    let journal: Arc<dyn PaymentJournal> = store.clone();
    let ledger_client: Arc<dyn LedgerClient> = ledger.clone();
    let executor =
        PaymentExecutor::new(ledger_client, journal, PaymentSettings::from(&config.payment));
    let engine = DecisionEngine::new(SettlementTerms::from(&config.negotiation));
    let runtime =
        AgentRuntime::new(store, executor, engine, config.negotiation.history_window);

    Ok(Application { config, db_pool, ledger, runtime })
}
