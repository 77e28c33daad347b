//! TDS transport backed by tiberius.
//!
//! This module provides the production [`SqlTransport`]:
//! - Microsoft Entra ID access token authentication
//! - TLS required, server certificate always validated
//! - One gateway redirect followed, as Azure SQL issues for proxy bypass
//! - Cells converted to [`SqlValue`] without lossy casts

use crate::config::ConnectionDescriptor;
use crate::connection::{SqlSession, SqlTransport};
use crate::credentials::AccessToken;
use crate::error::{DriverError, DriverErrorKind};
use crate::statement::Statement;
use crate::value::{ResultSet, SqlValue};
use async_trait::async_trait;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, trace};

type TdsClient = Client<Compat<TcpStream>>;

/// Opens tiberius sessions over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiberiusTransport;

impl TiberiusTransport {
    /// Creates the transport
    pub fn new() -> Self {
        Self
    }

    fn build_config(descriptor: &ConnectionDescriptor, token: &AccessToken) -> Config {
        let mut config = Config::new();
        config.host(&descriptor.host);
        config.port(descriptor.port);
        config.database(&descriptor.database);
        config.application_name(&descriptor.application_name);
        config.authentication(AuthMethod::aad_token(token.secret()));
        config.encryption(EncryptionLevel::Required);
        config
    }

    async fn connect_tcp(config: Config) -> Result<TdsClient, tiberius::error::Error> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(config, tcp.compat_write()).await
    }
}

#[async_trait]
impl SqlTransport for TiberiusTransport {
    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        token: &AccessToken,
    ) -> Result<Box<dyn SqlSession>, DriverError> {
        let config = Self::build_config(descriptor, token);

        let client = match Self::connect_tcp(config.clone()).await {
            Ok(client) => client,
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("Gateway redirected session to {}:{}", host, port);
                let mut redirected = config;
                redirected.host(&host);
                redirected.port(port);
                Self::connect_tcp(redirected).await.map_err(map_driver_error)?
            }
            Err(e) => return Err(map_driver_error(e)),
        };

        Ok(Box::new(TiberiusSession { client }))
    }
}

/// A live tiberius client.
pub struct TiberiusSession {
    client: TdsClient,
}

#[async_trait]
impl SqlSession for TiberiusSession {
    async fn query(&mut self, statement: &Statement) -> Result<ResultSet, DriverError> {
        let mut query = Query::new(statement.sql());
        for value in statement.values() {
            bind_value(&mut query, value);
        }
        trace!("Sending statement with {} parameters", statement.param_count());

        let mut stream = query.query(&mut self.client).await.map_err(map_driver_error)?;
        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(map_driver_error)?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = stream
            .into_first_result()
            .await
            .map_err(map_driver_error)?
            .iter()
            .map(convert_row)
            .collect();

        Ok(ResultSet::new(columns, rows))
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.client.close().await.map_err(map_driver_error)
    }
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value.clone() {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bit(v) => query.bind(v),
        SqlValue::TinyInt(v) => query.bind(v),
        SqlValue::SmallInt(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::BigInt(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Float(v) => query.bind(v),
        SqlValue::Decimal { value, scale } => {
            query.bind(tiberius::numeric::Numeric::new_with_scale(value, scale));
        }
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Binary(v) => query.bind(v),
        SqlValue::Guid(v) => query.bind(v),
        SqlValue::Date(v) => query.bind(v),
        SqlValue::Time(v) => query.bind(v),
        SqlValue::DateTime(v) => query.bind(v),
        SqlValue::DateTimeOffset(v) => query.bind(v),
    }
}

fn map_driver_error(error: tiberius::error::Error) -> DriverError {
    let kind = match &error {
        tiberius::error::Error::Io { .. }
        | tiberius::error::Error::Tls(_)
        | tiberius::error::Error::Protocol(_)
        | tiberius::error::Error::Routing { .. } => DriverErrorKind::Transport,
        tiberius::error::Error::Server(_) => DriverErrorKind::Server,
        _ => DriverErrorKind::Conversion,
    };
    DriverError::new(kind, error.to_string()).with_source(error)
}

fn convert_cell(data: &ColumnData<'_>) -> SqlValue {
    match data {
        ColumnData::Bit(Some(v)) => SqlValue::Bit(*v),
        ColumnData::U8(Some(v)) => SqlValue::TinyInt(*v),
        ColumnData::I16(Some(v)) => SqlValue::SmallInt(*v),
        ColumnData::I32(Some(v)) => SqlValue::Int(*v),
        ColumnData::I64(Some(v)) => SqlValue::BigInt(*v),
        ColumnData::F32(Some(v)) => SqlValue::Real(*v),
        ColumnData::F64(Some(v)) => SqlValue::Float(*v),
        ColumnData::Numeric(Some(n)) => SqlValue::Decimal {
            value: n.value(),
            scale: n.scale(),
        },
        ColumnData::String(Some(s)) => SqlValue::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => SqlValue::Guid(*g),
        ColumnData::Binary(Some(b)) => SqlValue::Binary(b.to_vec()),
        ColumnData::Xml(Some(xml)) => SqlValue::Text(xml.to_string()),
        _ => SqlValue::Null,
    }
}

/// Date and time cells go through chrono's typed getters.
fn convert_row(row: &tiberius::Row) -> Vec<SqlValue> {
    row.cells()
        .enumerate()
        .map(|(i, (_column, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, SqlValue::DateTime),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, SqlValue::DateTimeOffset),
            ColumnData::Date(Some(_)) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, SqlValue::Date),
            ColumnData::Time(Some(_)) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, SqlValue::Time),
            _ => convert_cell(data),
        })
        .collect()
}
