//! Typed report records.
//!
//! Records built from a single result row keep the engine's column names
//! (`ServerName`, `TableCategory`); synthesized reports use snake_case keys.

use super::classify::TableCategory;
use crate::config::{ConnectorConfig, INTEGRATION_ID};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Stamp carried by every synthesized report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportMetadata {
    /// When the report was produced (UTC)
    pub timestamp: DateTime<Utc>,
    /// Configured server host
    pub server: String,
    /// Configured database
    pub database: String,
    /// Integration identifier
    pub integration_id: String,
}

impl ReportMetadata {
    /// Stamps a report for `config` at the current instant
    pub fn for_config(config: &ConnectorConfig) -> Self {
        Self {
            timestamp: Utc::now(),
            server: config.server.clone(),
            database: config.database.clone(),
            integration_id: INTEGRATION_ID.to_string(),
        }
    }
}

/// Identity and version of the server behind the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    /// `@@SERVERNAME`
    pub server_name: Option<String>,
    /// `@@VERSION` banner
    pub sql_version: Option<String>,
    /// Database the session is attached to
    pub current_database: Option<String>,
    /// Login the token mapped to
    pub current_user: Option<String>,
    /// Server clock at query time
    pub current_time: Option<NaiveDateTime>,
    /// Session language
    #[serde(rename = "LanguageSetting")]
    pub language: Option<String>,
}

/// One user database on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseEntry {
    /// Database name
    #[serde(rename = "DatabaseName")]
    pub name: String,
    /// `sys.databases.database_id`
    pub database_id: i64,
    /// Creation timestamp
    #[serde(rename = "CreatedDate")]
    pub created: Option<NaiveDateTime>,
    /// Default collation
    pub collation: Option<String>,
    /// State description such as `ONLINE`
    pub state: Option<String>,
    /// Compatibility level
    pub compatibility_level: Option<i64>,
}

/// Object counts and session details for the target database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestrationMetrics {
    /// Database the counts were taken in
    pub database_name: Option<String>,
    /// Login running the analysis
    pub current_user: Option<String>,
    /// `@@SPID` of the session
    pub session_id: Option<i64>,
    /// Server clock at analysis time
    pub analysis_time: Option<NaiveDateTime>,
    /// `@@VERSION` banner
    pub sql_version: Option<String>,
    /// Schemas in the database
    pub schema_count: u64,
    /// Base tables
    pub table_count: u64,
    /// Views
    pub view_count: u64,
    /// Stored procedures
    pub stored_procedure_count: u64,
    /// User-defined functions
    pub function_count: u64,
}

/// Result of the orchestration analysis; a failure degrades to an error
/// message with no metric keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    /// All counts were collected
    Complete(OrchestrationMetrics),
    /// The analysis could not run
    Degraded {
        /// Failure message
        error: String,
    },
}

/// Orchestration analysis report.
///
/// # Example
/// A degraded report serializes flat:
/// ```json
/// {"timestamp":"2026-01-05T10:00:00Z","server":"cxmidl.database.windows.net",
///  "database":"Orchestration","integration_id":"cxmidl-orchestration-enterprise",
///  "error":"Database connection failed: ..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationAnalysis {
    /// Report stamp
    #[serde(flatten)]
    pub metadata: ReportMetadata,
    /// Metrics or the failure
    #[serde(flatten)]
    pub outcome: AnalysisOutcome,
}

impl OrchestrationAnalysis {
    /// Metrics when the analysis completed
    pub fn metrics(&self) -> Option<&OrchestrationMetrics> {
        match &self.outcome {
            AnalysisOutcome::Complete(metrics) => Some(metrics),
            AnalysisOutcome::Degraded { .. } => None,
        }
    }

    /// Error message when the analysis degraded
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            AnalysisOutcome::Complete(_) => None,
            AnalysisOutcome::Degraded { error } => Some(error),
        }
    }
}

/// One table in a schema with its column count and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableInventoryEntry {
    /// Owning schema
    pub schema_name: String,
    /// Table name
    pub table_name: String,
    /// `BASE TABLE` or `VIEW`
    pub table_type: String,
    /// Column count; 0 when the engine reported none
    pub column_count: i64,
    /// Category derived from the name
    #[serde(rename = "TableCategory")]
    pub category: TableCategory,
}

/// Server load at the moment of the health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PerformanceSnapshot {
    /// User sessions
    pub active_sessions: i64,
    /// Requests currently executing
    pub active_requests: i64,
    /// Databases in the `ONLINE` state
    pub online_databases: i64,
}

/// Health verdict, serialized under `connection_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "connection_status", rename_all = "lowercase")]
pub enum HealthOutcome {
    /// Server reachable and responsive
    Healthy {
        /// Server identity
        server_info: ServerInfo,
        /// Load snapshot
        performance_metrics: PerformanceSnapshot,
        /// Connector version
        version: String,
    },
    /// A health query failed on an established connector
    Unhealthy {
        /// Failure message
        error: String,
    },
    /// No session could be established for the check
    Failed {
        /// Failure message
        error: String,
    },
}

/// Health check report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Report stamp
    #[serde(flatten)]
    pub metadata: ReportMetadata,
    /// Verdict and its details
    #[serde(flatten)]
    pub outcome: HealthOutcome,
}

impl HealthReport {
    /// `healthy`, `unhealthy` or `failed`
    pub fn connection_status(&self) -> &'static str {
        match self.outcome {
            HealthOutcome::Healthy { .. } => "healthy",
            HealthOutcome::Unhealthy { .. } => "unhealthy",
            HealthOutcome::Failed { .. } => "failed",
        }
    }

    /// True for a healthy verdict
    pub fn is_healthy(&self) -> bool {
        matches!(self.outcome, HealthOutcome::Healthy { .. })
    }
}
