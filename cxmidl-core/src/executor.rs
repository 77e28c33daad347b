//! Parameterized query execution with timing and retry.

use crate::Result;
use crate::connection::ConnectionManager;
use crate::error::ConnectorError;
use crate::statement::{QueryParams, Statement};
use crate::value::{QueryResult, ResultSet, ResultShape};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs statements on a [`ConnectionManager`]'s session.
///
/// Connects lazily when no session is held. A statement that fails because
/// the session broke is retried once on a fresh session; engine errors and
/// timeouts are not retried.
///
/// # Example
/// ```rust,no_run
/// use cxmidl_core::{Connector, ConnectorConfig, QueryParams, ResultShape};
///
/// # async fn run() -> cxmidl_core::Result<()> {
/// let mut connector = Connector::new(ConnectorConfig::default());
/// let params = QueryParams::new().bind("schema", "dbo");
/// let result = connector
///     .executor()
///     .execute(
///         "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = :schema",
///         &params,
///         ResultShape::RowList,
///     )
///     .await?;
/// println!("{} tables", result.row_count());
/// # Ok(())
/// # }
/// ```
pub struct QueryExecutor<'a> {
    manager: &'a mut ConnectionManager,
}

impl<'a> QueryExecutor<'a> {
    /// Borrows the manager for the executor's lifetime
    pub fn new(manager: &'a mut ConnectionManager) -> Self {
        Self { manager }
    }

    /// Configuration of the underlying connection
    pub fn config(&self) -> &crate::config::ConnectorConfig {
        self.manager.config()
    }

    /// Executes `sql` with named `params` and shapes the first result set.
    ///
    /// # Errors
    /// - [`crate::QueryFailure::Binding`] if the SQL is empty or references a
    ///   parameter that was not supplied
    /// - [`ConnectorError::Credential`] or [`ConnectorError::Connection`] if a
    ///   session cannot be established
    /// - [`crate::QueryFailure::Timeout`] if the command timeout elapses
    /// - [`crate::QueryFailure::Execution`] if the engine rejects the statement
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &QueryParams,
        shape: ResultShape,
    ) -> Result<QueryResult> {
        let statement = Statement::prepare(sql, params)?;
        let start = Instant::now();

        let set = self.run(&statement).await.inspect_err(|e| {
            error!(
                duration_ms = start.elapsed().as_millis() as u64,
                "Query failed: {}", e
            );
        })?;

        let result = QueryResult::from_result_set(set, shape);
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            row_count = result.row_count(),
            shape = %shape,
            "Query executed"
        );
        Ok(result)
    }

    async fn run(&mut self, statement: &Statement) -> Result<ResultSet> {
        let mut reconnected = false;
        if !self.manager.is_connected() {
            debug!("No live session, connecting before execution");
            self.manager.connect().await?;
            reconnected = true;
        }

        let timeout = self.manager.config().command_timeout;
        loop {
            let session = self.manager.session_mut().ok_or_else(|| {
                ConnectorError::connection_failed(
                    "executing statement",
                    crate::error::DriverError::transport("no session available"),
                )
            })?;

            match tokio::time::timeout(timeout, session.query(statement)).await {
                Ok(Ok(set)) => return Ok(set),
                Ok(Err(e)) if e.is_transport() && !reconnected => {
                    warn!("Session lost during query, reconnecting once: {}", e);
                    self.manager.invalidate().await;
                    self.manager.connect().await?;
                    reconnected = true;
                }
                Ok(Err(e)) => {
                    if e.is_transport() {
                        self.manager.invalidate().await;
                    }
                    return Err(ConnectorError::query_failed(statement.redacted(), e));
                }
                Err(_) => {
                    // The session may still be mid-response; it cannot be reused.
                    self.manager.invalidate().await;
                    return Err(ConnectorError::query_timeout(statement.redacted(), timeout));
                }
            }
        }
    }
}
