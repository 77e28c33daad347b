//! Authenticated access to the CXMIDL Orchestration database on Azure SQL.
//!
//! This crate resolves a Microsoft Entra ID token through an ordered
//! credential chain, holds one verified encrypted session, runs
//! parameterized queries with timing and a single transparent reconnect,
//! and produces typed analysis and health reports.
//!
//! # Security Guarantees
//! - Encryption required and server certificates validated on every session
//! - Tokens and client secrets are never logged or included in errors
//! - Query parameters are bound natively, never interpolated into SQL text
//! - Parameters flagged sensitive are redacted from error messages
//!
//! # Architecture
//! - `credentials`: token sources and the chain that orders them
//! - `connection`: session lifecycle behind the `SqlTransport` seam
//! - `mssql`: the tiberius transport
//! - `executor`: parameter binding, timeouts and retry
//! - `reports`: server, database, schema and health reports
//! - `connector`: the facade tying these together

pub mod config;
pub mod connection;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mssql;
pub mod reports;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use config::{AuthMode, ConnectionDescriptor, ConnectorConfig};
pub use connection::{ConnectionManager, ConnectionState, SqlSession, SqlTransport};
pub use connector::{Connector, run_integration_check};
pub use credentials::{
    AccessToken, ChainedCredential, CredentialError, CredentialFailure, CredentialOptions,
    StaticTokenCredential, TokenCredential,
};
pub use error::{ConnectorError, DriverError, DriverErrorKind, QueryFailure, Result};
pub use executor::QueryExecutor;
pub use reports::{
    AnalysisOutcome, AnalysisReporter, DatabaseEntry, HealthOutcome, HealthReport,
    OrchestrationAnalysis, OrchestrationMetrics, PerformanceSnapshot, ReportMetadata, ServerInfo,
    TableCategory, TableInventoryEntry,
};
pub use statement::{QueryParams, Statement};
pub use value::{QueryResult, ResultSet, ResultShape, Row, SqlValue, Table};
