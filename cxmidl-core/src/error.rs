//! Error types with credential sanitization.
//!
//! Access tokens, client secrets and parameter values flagged as sensitive
//! never appear in any error message produced by this crate. Every variant
//! keeps the message of the underlying cause so failures stay diagnosable.

use crate::credentials::CredentialError;
use thiserror::Error;

/// Boxed error used as the `source` of wrapped driver and I/O failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for connector operations.
///
/// # Propagation
/// `Credential` and `Connection` always reach the caller. `Query` reaches the
/// caller from [`crate::QueryExecutor`]; the best-effort reports absorb it into
/// a degraded result instead.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No credential source in the chain produced a token
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Session establishment or liveness check failed (token never included)
    #[error("Database connection failed: {context}: {message}")]
    Connection {
        context: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Statement execution failed; `statement` has sensitive values redacted
    #[error("Query {failure}: {message} [statement: {statement}]")]
    Query {
        failure: QueryFailure,
        statement: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Classification of a query failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFailure {
    /// The engine rejected or failed the statement
    Execution,
    /// The configured command timeout elapsed
    Timeout,
    /// The statement could not be prepared for binding
    Binding,
    /// A statement expected to yield a row yielded none
    EmptyResult,
}

impl std::fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::Binding => write!(f, "parameter binding failed"),
            Self::EmptyResult => write!(f, "returned no rows"),
        }
    }
}

/// Convenience type alias for Results with ConnectorError
pub type Result<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    /// Creates a connection error wrapping the underlying cause
    pub fn connection_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a connection timeout error
    pub fn connection_timeout(context: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Connection {
            context: context.into(),
            message: format!("timed out after {}s", timeout.as_secs()),
            source: None,
        }
    }

    /// Creates a query execution error wrapping the underlying cause
    pub fn query_failed<E>(statement: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Query {
            failure: QueryFailure::Execution,
            statement: statement.into(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates a timeout-classified query error
    pub fn query_timeout(statement: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Query {
            failure: QueryFailure::Timeout,
            statement: statement.into(),
            message: format!("command timeout of {}s elapsed", timeout.as_secs()),
            source: None,
        }
    }

    /// Creates a binding error for a statement that cannot be sent
    pub fn binding(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            failure: QueryFailure::Binding,
            statement: statement.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error for a statement that unexpectedly returned nothing
    pub fn empty_result(statement: impl Into<String>) -> Self {
        Self::Query {
            failure: QueryFailure::EmptyResult,
            statement: statement.into(),
            message: "expected at least one row".to_string(),
            source: None,
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the query failure classification, if this is a query error
    pub fn query_failure(&self) -> Option<QueryFailure> {
        match self {
            Self::Query { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    /// Returns true for credential and connection errors
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Credential(_) | Self::Connection { .. })
    }
}

/// Broad class of a driver-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Socket, TLS or protocol failure; the session is no longer usable
    Transport,
    /// The server returned an error for the statement
    Server,
    /// A value could not be converted to or from the wire format
    Conversion,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport error"),
            Self::Server => write!(f, "server error"),
            Self::Conversion => write!(f, "conversion error"),
        }
    }
}

/// Failure reported by a [`crate::SqlTransport`] or [`crate::SqlSession`].
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl DriverError {
    /// Creates a driver error from a kind and message
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Transport, message)
    }

    /// Creates a server error
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Server, message)
    }

    /// Attaches the underlying cause
    #[must_use]
    pub fn with_source<E>(mut self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(error));
        self
    }

    /// Returns the failure class
    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    /// Returns true when the session can no longer be used
    pub fn is_transport(&self) -> bool {
        self.kind == DriverErrorKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connection_error_keeps_cause_message() {
        let cause = DriverError::transport("connection reset by peer");
        let error = ConnectorError::connection_failed("opening session", cause);

        let message = error.to_string();
        assert!(message.contains("opening session"));
        assert!(message.contains("connection reset by peer"));
        assert!(error.is_connection_error());
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_query_error_carries_statement() {
        let error =
            ConnectorError::query_failed("SELECT * FROM jobs", DriverError::server("bad column"));

        assert_eq!(error.query_failure(), Some(QueryFailure::Execution));
        let message = error.to_string();
        assert!(message.contains("SELECT * FROM jobs"));
        assert!(message.contains("bad column"));
        assert!(!error.is_connection_error());
    }

    #[test]
    fn test_query_timeout_classification() {
        let error = ConnectorError::query_timeout("WAITFOR DELAY '01:00'", Duration::from_secs(5));
        assert_eq!(error.query_failure(), Some(QueryFailure::Timeout));
        assert!(error.to_string().contains("timed out"));
        assert!(error.to_string().contains("5s"));
    }

    #[test]
    fn test_error_creation() {
        let error = ConnectorError::configuration("server cannot be empty");
        assert!(error.to_string().contains("server cannot be empty"));
        assert_eq!(error.query_failure(), None);

        let error = ConnectorError::connection_timeout("liveness check", Duration::from_secs(30));
        assert!(error.to_string().contains("30s"));
    }

    #[test]
    fn test_driver_error_kinds() {
        assert!(DriverError::transport("eof").is_transport());
        assert!(!DriverError::server("syntax").is_transport());
        assert_eq!(
            DriverError::new(DriverErrorKind::Conversion, "x").kind(),
            DriverErrorKind::Conversion
        );
        assert_eq!(
            DriverError::server("Invalid object name").to_string(),
            "server error: Invalid object name"
        );
    }
}
