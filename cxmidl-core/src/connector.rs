//! High-level connector combining connection, execution and reporting.

use crate::Result;
use crate::config::ConnectorConfig;
use crate::connection::{ConnectionManager, ConnectionState, SqlTransport};
use crate::credentials::{ChainedCredential, CredentialOptions};
use crate::executor::QueryExecutor;
use crate::mssql::TiberiusTransport;
use crate::reports::{
    AnalysisReporter, DatabaseEntry, HealthOutcome, HealthReport, OrchestrationAnalysis,
    ReportMetadata, ServerInfo, TableInventoryEntry,
};
use crate::statement::QueryParams;
use crate::value::{QueryResult, ResultShape};
use std::sync::Arc;
use tracing::{info, warn};

/// Authenticated connector for one Azure SQL database.
///
/// # Example
/// ```rust,no_run
/// use cxmidl_core::{AuthMode, Connector, ConnectorConfig};
///
/// # async fn run() -> cxmidl_core::Result<()> {
/// let config = ConnectorConfig::default().with_auth_mode(AuthMode::Default);
/// let info = Connector::new(config)
///     .scoped(async |connector| connector.server_info().await)
///     .await?;
/// println!("{:?}", info.server_name);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connector {
    manager: ConnectionManager,
}

impl Connector {
    /// Creates a connector using the credential chain for the configured
    /// authentication mode and the tiberius transport.
    pub fn new(config: ConnectorConfig) -> Self {
        let credential =
            ChainedCredential::for_mode(config.auth_mode, &CredentialOptions::from_env());
        Self::with_parts(config, credential, Arc::new(TiberiusTransport::new()))
    }

    /// Creates a connector from explicit parts
    pub fn with_parts(
        config: ConnectorConfig,
        credential: ChainedCredential,
        transport: Arc<dyn SqlTransport>,
    ) -> Self {
        info!("Connector initialized: {}", config);
        Self {
            manager: ConnectionManager::new(config, credential, transport),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ConnectorConfig {
        self.manager.config()
    }

    /// Establishes a verified session.
    ///
    /// # Errors
    /// See [`ConnectionManager::connect`]
    pub async fn connect(&mut self) -> Result<()> {
        self.manager.connect().await
    }

    /// Releases the session; a no-op when nothing is open
    pub async fn close(&mut self) {
        self.manager.close().await;
    }

    /// True while a verified session is held
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Borrows a query executor
    pub fn executor(&mut self) -> QueryExecutor<'_> {
        QueryExecutor::new(&mut self.manager)
    }

    /// Borrows a report builder
    pub fn reporter(&mut self) -> AnalysisReporter<'_> {
        AnalysisReporter::new(&mut self.manager)
    }

    /// See [`QueryExecutor::execute`]
    ///
    /// # Errors
    /// See [`QueryExecutor::execute`]
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &QueryParams,
        shape: ResultShape,
    ) -> Result<QueryResult> {
        self.executor().execute(sql, params, shape).await
    }

    /// See [`AnalysisReporter::server_info`]
    ///
    /// # Errors
    /// See [`AnalysisReporter::server_info`]
    pub async fn server_info(&mut self) -> Result<ServerInfo> {
        self.reporter().server_info().await
    }

    /// See [`AnalysisReporter::list_databases`]
    ///
    /// # Errors
    /// See [`AnalysisReporter::list_databases`]
    pub async fn list_databases(&mut self) -> Result<Vec<DatabaseEntry>> {
        self.reporter().list_databases().await
    }

    /// See [`AnalysisReporter::orchestration_analysis`]
    pub async fn orchestration_analysis(&mut self) -> OrchestrationAnalysis {
        self.reporter().orchestration_analysis().await
    }

    /// See [`AnalysisReporter::table_inventory`]
    ///
    /// # Errors
    /// See [`AnalysisReporter::table_inventory`]
    pub async fn table_inventory(&mut self, schema: &str) -> Result<Vec<TableInventoryEntry>> {
        self.reporter().table_inventory(schema).await
    }

    /// See [`AnalysisReporter::health_check`]
    pub async fn health_check(&mut self) -> HealthReport {
        self.reporter().health_check().await
    }

    /// Connects, runs `f`, and closes on every exit path.
    ///
    /// # Errors
    /// Returns the connect error (after cleanup) or whatever `f` returns
    pub async fn scoped<T, F>(mut self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Connector) -> Result<T>,
    {
        if let Err(e) = self.connect().await {
            self.close().await;
            return Err(e);
        }

        let outcome = f(&mut self).await;
        self.close().await;
        outcome
    }

    /// Scoped health check; a connector that cannot connect reports `failed`.
    pub async fn integration_check(self) -> HealthReport {
        let metadata = ReportMetadata::for_config(self.config());
        match self
            .scoped(async |connector| Ok(connector.health_check().await))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!("Integration check could not connect: {}", e);
                HealthReport {
                    metadata,
                    outcome: HealthOutcome::Failed {
                        error: e.to_string(),
                    },
                }
            }
        }
    }
}

/// Runs a one-shot integration health check with `config`.
pub async fn run_integration_check(config: ConnectorConfig) -> HealthReport {
    Connector::new(config).integration_check().await
}
