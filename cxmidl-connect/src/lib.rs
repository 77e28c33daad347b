//! Command-line surface for the CXMIDL Orchestration connector.
//!
//! Argument parsing and command dispatch live here so they can be tested
//! without spawning the binary; `main.rs` only wires logging and output.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cxmidl_core::logging::LogFormat;
use cxmidl_core::{AuthMode, Connector, ConnectorConfig, QueryParams, ResultShape, SqlValue};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "cxmidl-connect")]
#[command(about = "Authenticated Azure SQL client for the CXMIDL Orchestration database")]
#[command(version)]
#[command(long_about = "
CXMIDL Connect - Azure SQL connectivity with Microsoft Entra ID authentication

Resolves an access token through a credential chain, opens an encrypted
session and prints JSON reports on stdout. Logs go to stderr.

AUTHENTICATION MODES:
- mfa:     interactive browser sign-in, then environment and Azure CLI
- default: environment, managed identity, then Azure CLI

EXAMPLES:
  cxmidl-connect
  cxmidl-connect --auth default health
  cxmidl-connect tables --schema dbo
  cxmidl-connect query 'SELECT TOP (:n) name FROM sys.tables' --param n=5 --rows
")]
pub struct Cli {
    /// Logging flags
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Server and timeout settings
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Operation to run; defaults to `check`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available operations
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Connect, run the health check and close (exit status reflects health)
    Check,
    /// Health report; an unreachable server reports `unhealthy`
    Health,
    /// Server identity and version
    ServerInfo,
    /// User databases on the server
    Databases,
    /// Object counts for the configured database
    Analyze,
    /// Tables of a schema with column counts and categories
    Tables(TablesArgs),
    /// Run a parameterized statement
    Query(QueryArgs),
}

/// Arguments of `tables`
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TablesArgs {
    /// Schema to inventory
    #[arg(long, default_value = "dbo")]
    pub schema: String,
}

/// Arguments of `query`
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct QueryArgs {
    /// SQL text with `:name` placeholders
    pub sql: String,

    /// Parameter binding (repeatable)
    #[arg(
        short,
        long = "param",
        value_name = "NAME=VALUE",
        value_parser = parse_param,
        help = "Bind a named parameter; integers are bound as bigint, anything else as text"
    )]
    pub params: Vec<(String, String)>,

    /// Parameter names to redact from diagnostics (repeatable)
    #[arg(long, value_name = "NAME")]
    pub sensitive: Vec<String>,

    /// Emit one object per row instead of columns plus rows
    #[arg(long)]
    pub rows: bool,
}

/// Verbosity and log format
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    pub quiet: bool,

    /// Log record format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

/// Connection settings; each also reads a `CXMIDL_*` variable.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ConnectionArgs {
    /// Server host
    #[arg(long, global = true, env = "CXMIDL_SERVER")]
    pub server: Option<String>,

    /// TDS port
    #[arg(long, global = true, env = "CXMIDL_PORT")]
    pub port: Option<u16>,

    /// Database name
    #[arg(long, global = true, env = "CXMIDL_DATABASE")]
    pub database: Option<String>,

    /// Authentication mode
    #[arg(long, global = true, env = "CXMIDL_AUTH", value_enum)]
    pub auth: Option<AuthArg>,

    /// Connect and liveness-check timeout in seconds
    #[arg(long, global = true, env = "CXMIDL_CONNECT_TIMEOUT", value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Per-statement timeout in seconds
    #[arg(long, global = true, env = "CXMIDL_COMMAND_TIMEOUT", value_name = "SECS")]
    pub command_timeout: Option<u64>,
}

/// `--auth` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthArg {
    /// Interactive browser sign-in first
    Mfa,
    /// Non-interactive sources only
    Default,
}

impl From<AuthArg> for AuthMode {
    fn from(value: AuthArg) -> Self {
        match value {
            AuthArg::Mfa => Self::Mfa,
            AuthArg::Default => Self::Default,
        }
    }
}

/// `--log-format` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

impl ConnectionArgs {
    /// Applies the flags over [`ConnectorConfig::default`] and validates.
    ///
    /// # Errors
    /// Returns an error when the resulting configuration is invalid
    pub fn to_config(&self) -> anyhow::Result<ConnectorConfig> {
        let mut config = ConnectorConfig::default();
        if let Some(server) = &self.server {
            config = config.with_server(server.as_str());
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(database) = &self.database {
            config = config.with_database(database.as_str());
        }
        if let Some(auth) = self.auth {
            config = config.with_auth_mode(auth.into());
        }
        if let Some(secs) = self.connect_timeout {
            config = config.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.command_timeout {
            config = config.with_command_timeout(Duration::from_secs(secs));
        }
        config.validate().context("invalid connection settings")?;
        Ok(config)
    }
}

/// Parses `name=value`; a leading `:` on the name is accepted.
///
/// # Errors
/// Returns a message when the `=` is missing or the name is empty
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim().trim_start_matches(':');
    if name.is_empty() {
        return Err(format!("parameter name is empty in '{}'", raw));
    }
    Ok((name.to_string(), value.to_string()))
}

fn param_value(raw: &str) -> SqlValue {
    raw.parse::<i64>()
        .map_or_else(|_| SqlValue::from(raw), SqlValue::from)
}

/// Builds bound parameters from `--param` pairs and `--sensitive` names.
///
/// # Errors
/// Returns an error when a `--sensitive` name was never bound
pub fn build_params(
    pairs: &[(String, String)],
    sensitive: &[String],
) -> anyhow::Result<QueryParams> {
    let mut params = pairs
        .iter()
        .fold(QueryParams::new(), |params, (name, value)| {
            params.bind(name.as_str(), param_value(value))
        });
    for name in sensitive {
        let name = name.trim_start_matches(':');
        if !params.mark_sensitive(name) {
            bail!("--sensitive names '{}', which is not a bound parameter", name);
        }
    }
    Ok(params)
}

/// JSON report plus whether the operation fully succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Document printed on stdout
    pub report: serde_json::Value,
    /// False for degraded or unhealthy reports
    pub success: bool,
}

impl Outcome {
    fn new<T: Serialize>(report: &T, success: bool) -> anyhow::Result<Self> {
        Ok(Self {
            report: serde_json::to_value(report).context("failed to serialize report")?,
            success,
        })
    }
}

/// Runs `command` against `connector`, closing it before returning.
///
/// `check`, `health` and `analyze` always produce a report; the other
/// commands propagate connection and query errors.
///
/// # Errors
/// Returns connection, query and argument errors
pub async fn run(command: &Command, mut connector: Connector) -> anyhow::Result<Outcome> {
    info!("Running {:?} against {}", command, connector.config());
    match command {
        Command::Check => {
            let report = connector.integration_check().await;
            Outcome::new(&report, report.is_healthy())
        }
        Command::Health => {
            let report = connector.health_check().await;
            connector.close().await;
            Outcome::new(&report, report.is_healthy())
        }
        Command::Analyze => {
            let report = connector.orchestration_analysis().await;
            connector.close().await;
            Outcome::new(&report, report.metrics().is_some())
        }
        Command::ServerInfo => {
            let info = connector
                .scoped(async |c| c.server_info().await)
                .await
                .context("server info failed")?;
            Outcome::new(&info, true)
        }
        Command::Databases => {
            let databases = connector
                .scoped(async |c| c.list_databases().await)
                .await
                .context("database listing failed")?;
            Outcome::new(&databases, true)
        }
        Command::Tables(args) => {
            let inventory = connector
                .scoped(async |c| c.table_inventory(&args.schema).await)
                .await
                .with_context(|| format!("table inventory for schema '{}' failed", args.schema))?;
            Outcome::new(&inventory, true)
        }
        Command::Query(args) => {
            let params = build_params(&args.params, &args.sensitive)?;
            let shape = if args.rows {
                ResultShape::RowList
            } else {
                ResultShape::Tabular
            };
            let result = connector
                .scoped(async |c| c.execute(&args.sql, &params, shape).await)
                .await
                .context("query failed")?;
            Outcome::new(&result, true)
        }
    }
}
