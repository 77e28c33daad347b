//! Authenticated session lifecycle.
//!
//! [`ConnectionManager`] owns at most one live session. It resolves a token
//! through the credential chain, opens a session with encryption and
//! certificate validation enforced, verifies liveness, and tears everything
//! down on failure or close.
//!
//! The wire protocol sits behind [`SqlTransport`] and [`SqlSession`] so the
//! lifecycle can be driven against any TDS implementation.

use crate::config::{ConnectionDescriptor, ConnectorConfig};
use crate::credentials::{AccessToken, ChainedCredential, SQL_DATABASE_SCOPE};
use crate::error::{ConnectorError, DriverError};
use crate::statement::Statement;
use crate::value::ResultSet;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Statement used to prove a freshly opened session is usable
pub const LIVENESS_QUERY: &str = "SELECT GETDATE() AS CurrentTime";

/// Opens sessions to the database engine.
#[async_trait]
pub trait SqlTransport: Send + Sync {
    /// Opens an encrypted, authenticated session.
    ///
    /// # Errors
    /// Returns a driver error if the server is unreachable, rejects the token
    /// or the TLS handshake fails
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        token: &AccessToken,
    ) -> std::result::Result<Box<dyn SqlSession>, DriverError>;
}

/// One live database session.
#[async_trait]
pub trait SqlSession: Send {
    /// Executes a statement and fully materializes its first result set.
    ///
    /// # Errors
    /// Returns a driver error; [`DriverError::is_transport`] tells whether the
    /// session survived
    async fn query(&mut self, statement: &Statement) -> std::result::Result<ResultSet, DriverError>;

    /// Closes the session
    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError>;
}

/// Lifecycle state of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet
    Unconnected,
    /// A connect is in progress
    Connecting,
    /// A live, verified session is held
    Connected,
    /// The last connect or query broke the session
    Failed,
    /// Closed by the caller
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{}", label)
    }
}

/// Owns the credential chain, the transport and at most one session.
pub struct ConnectionManager {
    config: ConnectorConfig,
    credential: ChainedCredential,
    transport: Arc<dyn SqlTransport>,
    session: Option<Box<dyn SqlSession>>,
    state: ConnectionState,
}

impl ConnectionManager {
    /// Creates an unconnected manager
    pub fn new(
        config: ConnectorConfig,
        credential: ChainedCredential,
        transport: Arc<dyn SqlTransport>,
    ) -> Self {
        Self {
            config,
            credential,
            transport,
            session: None,
            state: ConnectionState::Unconnected,
        }
    }

    /// Configuration this manager connects with
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a verified session is held
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.is_some()
    }

    /// Establishes a verified session, replacing any existing one.
    ///
    /// # Errors
    /// Returns [`ConnectorError::Credential`] when no token could be acquired
    /// and [`ConnectorError::Connection`] when the session cannot be opened or
    /// fails the liveness check. The manager is left in
    /// [`ConnectionState::Failed`] with no session held.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Replacing existing session");
            self.release().await;
        }

        self.config.validate()?;
        self.state = ConnectionState::Connecting;
        let start = Instant::now();
        info!(
            server = %self.config.server,
            database = %self.config.database,
            auth_mode = %self.config.auth_mode,
            "Connecting to Azure SQL"
        );

        let token = match self.credential.resolve(SQL_DATABASE_SCOPE).await {
            Ok(token) => token,
            Err(e) => {
                error!("Authentication failed: {}", e);
                self.state = ConnectionState::Failed;
                return Err(ConnectorError::Credential(e));
            }
        };

        let descriptor = self.config.descriptor();
        debug!("Connection string: {}", descriptor.to_connection_string());

        match self.open_verified(&descriptor, &token).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Connected to {} as database {}",
                    descriptor.address(),
                    descriptor.database
                );
                Ok(())
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn open_verified(
        &self,
        descriptor: &ConnectionDescriptor,
        token: &AccessToken,
    ) -> Result<Box<dyn SqlSession>> {
        let timeout = self.config.connect_timeout;

        let mut session = tokio::time::timeout(timeout, self.transport.open(descriptor, token))
            .await
            .map_err(|_| ConnectorError::connection_timeout("opening session", timeout))?
            .map_err(|e| ConnectorError::connection_failed("opening session", e))?;

        let liveness = Statement::raw(LIVENESS_QUERY);
        let verified = match tokio::time::timeout(timeout, session.query(&liveness)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ConnectorError::connection_failed("liveness check", e)),
            Err(_) => Err(ConnectorError::connection_timeout("liveness check", timeout)),
        };

        match verified {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("Closing unverified session failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Releases the session. Closing an unconnected or closed manager is a
    /// no-op.
    pub async fn close(&mut self) {
        match self.state {
            ConnectionState::Unconnected | ConnectionState::Closed if self.session.is_none() => {
                return;
            }
            _ => {}
        }
        self.release().await;
        self.state = ConnectionState::Closed;
        info!("Connection closed");
    }

    /// Drops a session that can no longer be trusted, leaving the manager
    /// in [`ConnectionState::Failed`]
    pub async fn invalidate(&mut self) {
        if self.session.is_some() {
            warn!("Discarding broken session");
        }
        self.release().await;
        self.state = ConnectionState::Failed;
    }

    /// The live session, if any
    pub fn session_mut(&mut self) -> Option<&mut (dyn SqlSession + 'static)> {
        self.session.as_deref_mut()
    }

    async fn release(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(e) = session.close().await
        {
            debug!("Error while closing session: {}", e);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!("Connection manager dropped with an open session");
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("sources", &self.credential.source_names())
            .finish_non_exhaustive()
    }
}
