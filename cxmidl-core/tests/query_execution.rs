//! Query execution tests: binding, shaping, timeouts and the single
//! transparent reconnect.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{FakeTransport, Scripted, connector, result};
use cxmidl_core::{
    ConnectionState, DriverErrorKind, QueryFailure, QueryParams, QueryResult, ResultShape,
    SqlValue,
};

fn jobs_result() -> Scripted {
    Scripted::Rows(result(
        &["JobId", "Name", "Priority"],
        vec![
            vec![SqlValue::BigInt(1), SqlValue::from("nightly_sync"), SqlValue::TinyInt(3)],
            vec![SqlValue::BigInt(2), SqlValue::from("hourly_rollup"), SqlValue::Null],
        ],
    ))
}

#[tokio::test]
async fn test_execute_connects_lazily() {
    let transport = FakeTransport::new();
    transport.respond("FROM jobs", jobs_result());
    let mut connector = connector(&transport);

    let result = connector
        .execute(
            "SELECT JobId, Name, Priority FROM jobs",
            &QueryParams::new(),
            ResultShape::Tabular,
        )
        .await
        .unwrap();

    assert_eq!(transport.opens(), 1);
    assert!(connector.is_connected());
    assert_eq!(result.row_count(), 2);
}

#[tokio::test]
async fn test_result_shapes() {
    let transport = FakeTransport::new();
    transport.respond("FROM jobs", jobs_result());
    let mut connector = connector(&transport);

    let table = connector
        .execute("SELECT * FROM jobs", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap();
    let QueryResult::Table(table) = table else {
        unreachable!("tabular shape requested");
    };
    assert_eq!(table.columns, vec!["JobId", "Name", "Priority"]);
    assert_eq!(table.rows[0][2], SqlValue::TinyInt(3), "engine types are kept");

    let rows = connector
        .execute("SELECT * FROM jobs", &QueryParams::new(), ResultShape::RowList)
        .await
        .unwrap()
        .into_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].text("Name"), Some("hourly_rollup"));
    assert!(rows[1].get("Priority").unwrap().is_null());

    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json[0]["Name"], "nightly_sync");
    assert_eq!(json[0]["JobId"], 1);
}

#[tokio::test]
async fn test_named_parameters_are_bound_positionally() {
    let transport = FakeTransport::new();
    let mut connector = connector(&transport);

    let params = QueryParams::new()
        .bind("schema", "dbo")
        .bind("limit", 5);
    connector
        .execute(
            "SELECT TOP (:limit) TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = :schema AND TABLE_NAME <> ':schema'",
            &params,
            ResultShape::Tabular,
        )
        .await
        .unwrap();

    let sent = transport.statements().pop().unwrap();
    assert_eq!(
        sent,
        "SELECT TOP (@P1) TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @P2 AND TABLE_NAME <> ':schema'"
    );
    assert_eq!(
        transport.bound().pop().unwrap(),
        vec![SqlValue::Int(5), SqlValue::from("dbo")]
    );
}

#[tokio::test]
async fn test_injection_payload_is_bound_not_concatenated() {
    let transport = FakeTransport::new();
    let mut connector = connector(&transport);
    let payload = "'; DROP TABLE x; --";

    connector
        .execute(
            "SELECT * FROM jobs WHERE Name = :name",
            &QueryParams::new().bind("name", payload),
            ResultShape::Tabular,
        )
        .await
        .unwrap();

    let sent = transport.statements().pop().unwrap();
    assert!(!sent.contains("DROP TABLE"));
    assert_eq!(sent, "SELECT * FROM jobs WHERE Name = @P1");
    assert_eq!(transport.bound().pop().unwrap(), vec![SqlValue::from(payload)]);
}

#[tokio::test]
async fn test_binding_errors_never_reach_the_engine() {
    let transport = FakeTransport::new();
    let mut connector = connector(&transport);

    let error = connector
        .execute("   ", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap_err();
    assert_eq!(error.query_failure(), Some(QueryFailure::Binding));

    let error = connector
        .execute("SELECT * FROM jobs WHERE JobId = :id", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap_err();
    assert_eq!(error.query_failure(), Some(QueryFailure::Binding));
    assert!(error.to_string().contains(":id"));

    assert_eq!(transport.opens(), 0);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let transport = FakeTransport::new();
    transport.respond(
        "FROM missing",
        Scripted::Fail(DriverErrorKind::Server, "Invalid object name 'missing'.".to_string()),
    );
    let mut connector = connector(&transport);

    let error = connector
        .execute("SELECT * FROM missing", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap_err();

    assert_eq!(error.query_failure(), Some(QueryFailure::Execution));
    let message = error.to_string();
    assert!(message.contains("Invalid object name 'missing'."));
    assert!(message.contains("SELECT * FROM missing"));
    assert_eq!(transport.opens(), 1);
    assert!(connector.is_connected(), "engine errors keep the session");
}

#[tokio::test]
async fn test_transport_failure_reconnects_once() {
    let transport = FakeTransport::new();
    transport.respond("FROM jobs", jobs_result());
    let mut connector = connector(&transport);
    connector.connect().await.unwrap();

    transport.respond_once(
        "FROM jobs",
        Scripted::Fail(DriverErrorKind::Transport, "connection reset by peer".to_string()),
    );
    let result = connector
        .execute("SELECT * FROM jobs", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap();

    assert_eq!(result.row_count(), 2);
    assert_eq!(transport.opens(), 2);
    assert_eq!(transport.closes(), 1);
    assert!(connector.is_connected());
}

#[tokio::test]
async fn test_second_transport_failure_surfaces() {
    let transport = FakeTransport::new();
    transport.respond(
        "FROM jobs",
        Scripted::Fail(DriverErrorKind::Transport, "connection reset by peer".to_string()),
    );
    let mut connector = connector(&transport);
    connector.connect().await.unwrap();

    let error = connector
        .execute("SELECT * FROM jobs", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap_err();

    assert!(error.to_string().contains("connection reset by peer"));
    assert_eq!(transport.opens(), 2, "exactly one reconnect");
    assert_eq!(connector.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_command_timeout_invalidates_session() {
    let transport = FakeTransport::new();
    transport.respond_once("WAITFOR", Scripted::Hang);
    let mut connector = connector(&transport);

    let error = connector
        .execute("WAITFOR DELAY '01:00:00'", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap_err();
    assert_eq!(error.query_failure(), Some(QueryFailure::Timeout));
    assert!(error.to_string().contains("command timeout of 10s"));
    assert_eq!(connector.state(), ConnectionState::Failed);

    // The next call gets a fresh session
    connector
        .execute("SELECT 1", &QueryParams::new(), ResultShape::Tabular)
        .await
        .unwrap();
    assert_eq!(transport.opens(), 2);
}

#[tokio::test]
async fn test_sensitive_values_are_redacted_in_errors() {
    let transport = FakeTransport::new();
    transport.respond(
        "UPDATE",
        Scripted::Fail(DriverErrorKind::Server, "permission denied".to_string()),
    );
    let mut connector = connector(&transport);

    let params = QueryParams::new()
        .bind("owner", "svc-orchestrator")
        .bind_sensitive("secret", "hunter2");
    let error = connector
        .execute(
            "UPDATE credentials SET value = :secret WHERE owner = :owner",
            &params,
            ResultShape::Tabular,
        )
        .await
        .unwrap_err();

    let message = error.to_string();
    assert!(!message.contains("hunter2"), "secret leaked: {}", message);
    assert!(message.contains(":secret=****"));
    assert!(message.contains("svc-orchestrator"));
}
