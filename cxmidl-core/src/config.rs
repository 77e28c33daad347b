//! Connector configuration.
//!
//! This module provides the immutable `ConnectorConfig` read by every
//! component, and the `ConnectionDescriptor` derived from it when a session
//! is opened.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Azure SQL server hosting the Orchestration database
pub const DEFAULT_SERVER: &str = "cxmidl.database.windows.net";

/// Default target database
pub const DEFAULT_DATABASE: &str = "Orchestration";

/// Native TDS port
pub const DEFAULT_PORT: u16 = 1433;

/// Identifier stamped on every report
pub const INTEGRATION_ID: &str = "cxmidl-orchestration-enterprise";

/// Connector release identifier reported by health checks
pub const CONNECTOR_VERSION: &str = "1.0.0_UNNILNILIUM";

/// How the connector authenticates against Microsoft Entra ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Interactive browser login first, then the non-interactive chain
    /// without managed identity
    Mfa,
    /// Non-interactive chain only
    Default,
}

impl AuthMode {
    /// Authentication keyword used in the diagnostic connection string
    pub fn authentication_keyword(self) -> &'static str {
        match self {
            Self::Mfa => "ActiveDirectoryInteractive",
            Self::Default => "ActiveDirectoryDefault",
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mfa => write!(f, "mfa"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = crate::error::ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mfa" | "interactive" => Ok(Self::Mfa),
            "default" | "standard" => Ok(Self::Default),
            other => Err(crate::error::ConnectorError::configuration(format!(
                "unknown authentication mode '{}' (expected 'mfa' or 'default')",
                other
            ))),
        }
    }
}

/// Configuration for a connector instance.
///
/// # Security
/// This struct intentionally does NOT store tokens or secrets. Credentials are
/// resolved at connect time and owned by the connection manager.
///
/// # Example
/// ```rust
/// use cxmidl_core::{AuthMode, ConnectorConfig};
/// use std::time::Duration;
///
/// let config = ConnectorConfig::default()
///     .with_database("Staging")
///     .with_auth_mode(AuthMode::Default)
///     .with_command_timeout(Duration::from_secs(120));
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.database, "Staging");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Database server host
    pub server: String,
    /// TDS port
    pub port: u16,
    /// Target database name
    pub database: String,
    /// Authentication mode
    pub auth_mode: AuthMode,
    /// Bound on session establishment and the liveness check
    pub connect_timeout: Duration,
    /// Bound on each statement
    pub command_timeout: Duration,
    /// Application name reported to the server
    pub application_name: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            auth_mode: AuthMode::Mfa,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(600),
            application_name: INTEGRATION_ID.to_string(),
        }
    }
}

impl std::fmt::Display for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectorConfig({}:{}/{}, auth={})",
            self.server, self.port, self.database, self.auth_mode
        )
    }
}

impl ConnectorConfig {
    /// Creates a config targeting `database` on the default server.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Validates configuration parameters.
    ///
    /// # Errors
    /// Returns error if any value is empty or zero
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.trim().is_empty() {
            return Err(crate::error::ConnectorError::configuration(
                "server cannot be empty",
            ));
        }

        if self.database.trim().is_empty() {
            return Err(crate::error::ConnectorError::configuration(
                "database cannot be empty",
            ));
        }

        if self.port == 0 {
            return Err(crate::error::ConnectorError::configuration(
                "port must be greater than 0",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(crate::error::ConnectorError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        if self.command_timeout.is_zero() {
            return Err(crate::error::ConnectorError::configuration(
                "command_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Builder method to set server.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Builder method to set port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Builder method to set authentication mode.
    #[must_use]
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Builder method to set connection timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder method to set command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Builds the descriptor used to open a session.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: self.server.clone(),
            port: self.port,
            database: self.database.clone(),
            authentication: self.auth_mode,
            encrypt: true,
            trust_server_certificate: false,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            application_name: self.application_name.clone(),
        }
    }
}

/// Everything a transport needs to open a session, except the token.
///
/// Encryption is always required and the server certificate is always
/// validated; there is no override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Server host
    pub host: String,
    /// TDS port
    pub port: u16,
    /// Initial catalog
    pub database: String,
    /// Authentication keyword source
    pub authentication: AuthMode,
    /// Always true
    pub encrypt: bool,
    /// Always false
    pub trust_server_certificate: bool,
    /// Login and liveness-check bound
    pub connect_timeout: Duration,
    /// Per-statement bound
    pub command_timeout: Duration,
    /// Reported to the server as the client application
    pub application_name: String,
}

impl ConnectionDescriptor {
    /// Renders an ODBC-style connection string for diagnostics.
    ///
    /// The token is never part of the descriptor, so the output is safe to log.
    pub fn to_connection_string(&self) -> String {
        format!(
            "Server=tcp:{},{};Database={};Authentication={};Encrypt={};TrustServerCertificate={};Connection Timeout={};Command Timeout={};Application Name={};",
            self.host,
            self.port,
            self.database,
            self.authentication.authentication_keyword(),
            yes_no(self.encrypt),
            yes_no(self.trust_server_certificate),
            self.connect_timeout.as_secs(),
            self.command_timeout.as_secs(),
            self.application_name,
        )
    }

    /// Returns `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
