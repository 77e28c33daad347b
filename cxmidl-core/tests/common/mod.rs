//! Shared fixtures: an in-memory transport with scripted responses.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use cxmidl_core::credentials::AccessToken;
use cxmidl_core::{
    AuthMode, ChainedCredential, ConnectionDescriptor, Connector, ConnectorConfig, DriverError,
    DriverErrorKind, ResultSet, SqlSession, SqlTransport, SqlValue, StaticTokenCredential,
    Statement,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOiJSUzI1NiJ9.test-token";

/// What a session does when a statement matches.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(ResultSet),
    Fail(DriverErrorKind, String),
    Hang,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub opens: usize,
    pub closes: usize,
    pub statements: Vec<String>,
    pub bound: Vec<Vec<SqlValue>>,
    pub tokens: Vec<String>,
    pub descriptors: Vec<ConnectionDescriptor>,
    open_failures: VecDeque<(DriverErrorKind, String)>,
    once: VecDeque<(String, Scripted)>,
    responses: Vec<(String, Scripted)>,
}

/// Transport whose sessions answer from a script shared across reconnects.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement containing `fragment` gets `response`
    pub fn respond(&self, fragment: &str, response: Scripted) -> &Self {
        self.lock().responses.push((fragment.to_string(), response));
        self
    }

    /// The next statement containing `fragment` gets `response`, once
    pub fn respond_once(&self, fragment: &str, response: Scripted) -> &Self {
        self.lock().once.push_back((fragment.to_string(), response));
        self
    }

    /// The next `open` fails
    pub fn fail_next_open(&self, kind: DriverErrorKind, message: &str) -> &Self {
        self.lock()
            .open_failures
            .push_back((kind, message.to_string()));
        self
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn bound(&self) -> Vec<Vec<SqlValue>> {
        self.lock().bound.clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.lock().descriptors.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl SqlTransport for FakeTransport {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        token: &AccessToken,
    ) -> Result<Box<dyn SqlSession>, DriverError> {
        let mut state = self.lock();
        state.opens += 1;
        state.tokens.push(token.secret().to_string());
        state.descriptors.push(descriptor.clone());
        if let Some((kind, message)) = state.open_failures.pop_front() {
            return Err(DriverError::new(kind, message));
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl SqlSession for FakeSession {
    async fn query(&mut self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.statements.push(statement.sql().to_string());
            state.bound.push(statement.values().cloned().collect());

            let sql = statement.sql();
            let once = state
                .once
                .iter()
                .position(|(fragment, _)| sql.contains(fragment.as_str()));
            match once {
                Some(index) => state.once.remove(index).map(|(_, s)| s),
                None => state
                    .responses
                    .iter()
                    .find(|(fragment, _)| sql.contains(fragment.as_str()))
                    .map(|(_, s)| s.clone()),
            }
        };

        match scripted {
            Some(Scripted::Rows(set)) => Ok(set),
            Some(Scripted::Fail(kind, message)) => Err(DriverError::new(kind, message)),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(ResultSet::default())
            }
            None => Ok(ResultSet::default()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

pub fn result(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> ResultSet {
    ResultSet::new(columns.iter().map(ToString::to_string).collect(), rows)
}

pub fn test_config() -> ConnectorConfig {
    ConnectorConfig::default()
        .with_auth_mode(AuthMode::Default)
        .with_connect_timeout(Duration::from_secs(5))
        .with_command_timeout(Duration::from_secs(10))
}

pub fn static_chain() -> ChainedCredential {
    let token = AccessToken::new(TEST_TOKEN, Utc::now() + ChronoDuration::hours(1), "test");
    ChainedCredential::new(vec![Box::new(StaticTokenCredential::new(token))])
}

pub fn connector(transport: &FakeTransport) -> Connector {
    Connector::with_parts(test_config(), static_chain(), Arc::new(transport.clone()))
}

/// A connector whose credential chain has no sources
pub fn unauthenticated_connector(transport: &FakeTransport) -> Connector {
    Connector::with_parts(
        test_config(),
        ChainedCredential::new(Vec::new()),
        Arc::new(transport.clone()),
    )
}
