//! Analysis reports over the Orchestration database.
//!
//! [`AnalysisReporter`] composes fixed queries through a [`QueryExecutor`]
//! and turns their rows into typed records. `orchestration_analysis` and
//! `health_check` are best-effort: any failure, including an unreachable
//! server, degrades the report instead of returning an error.

mod classify;
mod models;
mod queries;

pub use classify::TableCategory;
pub use models::{
    AnalysisOutcome, DatabaseEntry, HealthOutcome, HealthReport, OrchestrationAnalysis,
    OrchestrationMetrics, PerformanceSnapshot, ReportMetadata, ServerInfo, TableInventoryEntry,
};

use crate::Result;
use crate::config::CONNECTOR_VERSION;
use crate::connection::ConnectionManager;
use crate::error::ConnectorError;
use crate::executor::QueryExecutor;
use crate::statement::QueryParams;
use crate::value::{ResultShape, Row, SqlValue};
use tracing::{debug, error, info};

/// Produces typed reports from the connected database.
pub struct AnalysisReporter<'a> {
    executor: QueryExecutor<'a>,
}

impl<'a> AnalysisReporter<'a> {
    /// Borrows the manager for the reporter's lifetime
    pub fn new(manager: &'a mut ConnectionManager) -> Self {
        Self {
            executor: QueryExecutor::new(manager),
        }
    }

    fn metadata(&self) -> ReportMetadata {
        ReportMetadata::for_config(self.executor.config())
    }

    async fn rows(&mut self, sql: &str, params: &QueryParams) -> Result<Vec<Row>> {
        Ok(self
            .executor
            .execute(sql, params, ResultShape::RowList)
            .await?
            .into_rows())
    }

    /// Server name, engine version, current database and principal, server
    /// time and session language.
    ///
    /// # Errors
    /// Propagates connection and query errors; an empty result is an
    /// [`crate::QueryFailure::EmptyResult`] error
    pub async fn server_info(&mut self) -> Result<ServerInfo> {
        let rows = self.rows(queries::SERVER_INFO, &QueryParams::new()).await?;
        let row = rows
            .first()
            .ok_or_else(|| ConnectorError::empty_result("server info query"))?;

        Ok(ServerInfo {
            server_name: owned_text(row, "ServerName"),
            sql_version: owned_text(row, "SqlVersion"),
            current_database: owned_text(row, "CurrentDatabase"),
            current_user: owned_text(row, "CurrentUser"),
            current_time: row.get("CurrentTime").and_then(SqlValue::as_datetime),
            language: owned_text(row, "LanguageSetting"),
        })
    }

    /// User databases, system databases excluded, ordered by name.
    ///
    /// # Errors
    /// Propagates connection and query errors
    pub async fn list_databases(&mut self) -> Result<Vec<DatabaseEntry>> {
        let rows = self.rows(queries::LIST_DATABASES, &QueryParams::new()).await?;
        Ok(rows
            .iter()
            .map(|row| DatabaseEntry {
                name: owned_text(row, "DatabaseName").unwrap_or_default(),
                database_id: integer(row, "DatabaseId").unwrap_or_default(),
                created: row.get("CreatedDate").and_then(SqlValue::as_datetime),
                collation: owned_text(row, "Collation"),
                state: owned_text(row, "State"),
                compatibility_level: integer(row, "CompatibilityLevel"),
            })
            .collect())
    }

    /// Object counts plus session metadata; never fails.
    pub async fn orchestration_analysis(&mut self) -> OrchestrationAnalysis {
        let metadata = self.metadata();
        let outcome = match self
            .rows(queries::ORCHESTRATION_ANALYSIS, &QueryParams::new())
            .await
        {
            Ok(rows) => {
                let metrics = metrics_from_rows(&rows);
                info!(
                    metric_rows = rows.len(),
                    "Orchestration database analysis completed"
                );
                AnalysisOutcome::Complete(metrics)
            }
            Err(e) => {
                error!("Orchestration analysis failed: {}", e);
                AnalysisOutcome::Degraded {
                    error: e.to_string(),
                }
            }
        };
        OrchestrationAnalysis { metadata, outcome }
    }

    /// Tables of `schema` with column counts and name-derived categories,
    /// ordered by category label then table name.
    ///
    /// # Errors
    /// Propagates connection and query errors
    pub async fn table_inventory(&mut self, schema: &str) -> Result<Vec<TableInventoryEntry>> {
        let params = QueryParams::new().bind("schema", schema);
        let rows = self.rows(queries::TABLE_INVENTORY, &params).await?;

        let mut entries: Vec<TableInventoryEntry> = rows
            .iter()
            .map(|row| {
                let table_name = owned_text(row, "TableName").unwrap_or_default();
                TableInventoryEntry {
                    schema_name: owned_text(row, "SchemaName").unwrap_or_default(),
                    category: TableCategory::classify(&table_name),
                    table_name,
                    table_type: owned_text(row, "TableType").unwrap_or_default(),
                    column_count: integer(row, "ColumnCount").unwrap_or(0),
                }
            })
            .collect();

        // Case-insensitive like the server's default collation
        entries.sort_by_cached_key(|entry| {
            (
                entry.category.label(),
                entry.table_name.to_lowercase(),
                entry.table_name.clone(),
            )
        });
        Ok(entries)
    }

    /// Server info plus a load snapshot; never fails.
    pub async fn health_check(&mut self) -> HealthReport {
        let metadata = self.metadata();
        let outcome = match self.healthy_outcome().await {
            Ok(outcome) => {
                info!("Health check passed");
                outcome
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                HealthOutcome::Unhealthy {
                    error: e.to_string(),
                }
            }
        };
        HealthReport { metadata, outcome }
    }

    async fn healthy_outcome(&mut self) -> Result<HealthOutcome> {
        let server_info = self.server_info().await?;
        let rows = self
            .rows(queries::PERFORMANCE_SNAPSHOT, &QueryParams::new())
            .await?;
        let performance_metrics = rows
            .first()
            .map(|row| PerformanceSnapshot {
                active_sessions: integer(row, "ActiveSessions").unwrap_or(0),
                active_requests: integer(row, "ActiveRequests").unwrap_or(0),
                online_databases: integer(row, "OnlineDatabases").unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(HealthOutcome::Healthy {
            server_info,
            performance_metrics,
            version: CONNECTOR_VERSION.to_string(),
        })
    }
}

fn owned_text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(|value| match value {
        SqlValue::Null => None,
        SqlValue::Text(text) => Some(text.clone()),
        other => Some(other.to_string()),
    })
}

fn integer(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(SqlValue::as_i64)
}

/// Counts arrive as text in the second column; anything unparsable is 0.
fn parse_count(value: Option<&SqlValue>) -> u64 {
    match value {
        Some(SqlValue::Text(text)) => text.trim().parse().unwrap_or(0),
        Some(other) => other.as_i64().and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
        None => 0,
    }
}

fn metrics_from_rows(rows: &[Row]) -> OrchestrationMetrics {
    let mut metrics = OrchestrationMetrics::default();
    for row in rows {
        let Some(kind) = row.get_index(0).and_then(SqlValue::as_str) else {
            continue;
        };
        let count = || parse_count(row.get_index(1));
        match kind.to_lowercase().as_str() {
            "database_metadata" => {
                metrics.database_name = owned_text(row, "DatabaseName");
                metrics.current_user = owned_text(row, "CurrentUser");
                metrics.session_id = integer(row, "SessionId");
                metrics.analysis_time = row.get("AnalysisTime").and_then(SqlValue::as_datetime);
                metrics.sql_version = owned_text(row, "SqlVersion");
            }
            "schema_count" => metrics.schema_count = count(),
            "table_count" => metrics.table_count = count(),
            "view_count" => metrics.view_count = count(),
            "stored_procedure_count" => metrics.stored_procedure_count = count(),
            "function_count" => metrics.function_count = count(),
            other => debug!("Ignoring analysis row of type {}", other),
        }
    }
    metrics
}
