//! Tests for the server lifecycle
//!
//! Time is paused so connect polling and timeouts run instantly.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::fixtures::{
    LinkMode, MockConnection, path_string, recording_connector, write_broken, write_handler,
};
use crate::{Error, Event, Server, ServerState, StartOutcome, WaitOutcome};

fn unused_connector() -> MockConnection {
    MockConnection::new(LinkMode::Connected).0
}

fn handler_dir(expression: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    write_handler(temp.path(), "handler.json", expression);
    temp
}

#[tokio::test(start_paused = true)]
async fn test_connected_link_is_not_reconnected() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);

    let outcome = server.start(Some(conn), true).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Running(_)));
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(probe.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_link_connects_once() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Manual);

    server.start(Some(conn), true).await.unwrap();

    assert_eq!(probe.connects(), 1);
    assert_eq!(server.state(), ServerState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_is_polled() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::AutoAfter(3));

    let outcome = server.start(Some(conn), true).await.unwrap();

    assert!(outcome.is_running());
    assert_eq!(probe.connects(), 0);
    assert!(probe.polls() > 3);
    assert_eq!(probe.subscriptions(), vec!["topic=a"]);
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_from_connection() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::AutoNever);
    let conn = conn.with_timeout(Duration::from_secs(2));

    let err = server.start(Some(conn), true).await.unwrap_err();

    assert!(matches!(err, Error::ConnectionTimeout(t) if t == Duration::from_secs(2)));
    assert_eq!(
        err.to_string(),
        "Connection to event hub was not established in 2 seconds"
    );
    assert_eq!(server.state(), ServerState::Connecting);
    assert!(probe.subscriptions().is_empty());
    assert!(server.connection().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_default() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector)
        .with_connect_timeout(Duration::from_secs(5));
    let (conn, _probe) = MockConnection::new(LinkMode::AutoNever);

    let err = server.start(Some(conn), true).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout(t) if t == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_no_handler_paths() {
    let mut server = Server::new(Vec::new(), unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);

    let outcome = server.start(Some(conn), true).await.unwrap();

    assert!(matches!(outcome, StartOutcome::NoHandlerPaths));
    assert!(!outcome.is_running());
    assert_eq!(server.state(), ServerState::Connecting);
    assert!(probe.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_across_paths() {
    let studio = TempDir::new().unwrap();
    write_broken(studio.path(), "broken.json");
    write_handler(studio.path(), "sync.json", "topic=studio.update");
    let missing = studio.path().join("does-not-exist");

    let mut server = Server::new(
        vec![path_string(studio.path()), path_string(&missing)],
        unused_connector,
    );
    let (conn, probe) = MockConnection::new(LinkMode::Connected);

    let outcome = server.start(Some(conn), true).await.unwrap();

    let StartOutcome::Running(report) = outcome else {
        panic!("expected a running server");
    };
    assert_eq!(report.load.failures.len(), 1);
    assert_eq!(report.registration.registered.len(), 1);
    assert!(report.registration.failures.is_empty());
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(probe.subscriptions(), vec!["topic=studio.update"]);

    let event = Event::new("studio.update", json!({"id": 7}));
    assert_eq!(server.connection().unwrap().deliver(&event), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_without_loading() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);

    let outcome = server.start(Some(conn), false).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Connected));
    assert_eq!(server.state(), ServerState::Running);
    assert!(probe.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_connection() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();

    server.stop().await;

    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.connection().is_none());
    assert_eq!(probe.disconnects(), 1);
    assert_eq!(probe.closes(), 1);

    // Second stop has nothing to release
    server.stop().await;
    assert_eq!(probe.disconnects(), 1);
    assert_eq!(probe.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_set_handler_paths_while_running_restarts() {
    let old = handler_dir("topic=old");
    let new = handler_dir("topic=new");
    let (connector, probes) = recording_connector();
    let mut server = Server::new(vec![path_string(old.path())], connector);

    server.start(None, true).await.unwrap();
    assert_eq!(probes.lock().unwrap().len(), 1);

    let outcome = server
        .set_handler_paths(vec![path_string(new.path())])
        .await
        .unwrap();

    assert!(matches!(outcome, Some(StartOutcome::Running(_))));
    assert_eq!(server.state(), ServerState::Running);

    let probes = probes.lock().unwrap();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].disconnects(), 1);
    assert_eq!(probes[0].closes(), 1);
    assert_eq!(probes[0].subscriptions(), vec!["topic=old"]);
    assert_eq!(probes[1].subscriptions(), vec!["topic=new"]);
    assert_eq!(probes[1].closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_handler_paths_while_stopped_only_stores() {
    let (connector, probes) = recording_connector();
    let mut server = Server::new(Vec::new(), connector);

    let outcome = server
        .set_handler_paths(vec!["/srv/handlers".to_string()])
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.handler_paths(), ["/srv/handlers".to_string()]);
    assert!(probes.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_handler_paths_while_connecting_restarts() {
    let dir = handler_dir("topic=late");
    let (connector, probes) = recording_connector();
    let mut server = Server::new(Vec::new(), connector);

    // Leave the server Connecting by starting without handler paths
    let (conn, first) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();
    assert_eq!(server.state(), ServerState::Connecting);

    let outcome = server
        .set_handler_paths(vec![path_string(dir.path())])
        .await
        .unwrap();

    assert!(matches!(outcome, Some(StartOutcome::Running(_))));
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(first.closes(), 1);
    let probes = probes.lock().unwrap();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].subscriptions(), vec!["topic=late"]);
}

#[tokio::test(start_paused = true)]
async fn test_connecting_after_timeout_restarts() {
    let dir = handler_dir("topic=a");
    let (connector, probes) = recording_connector();
    let mut server = Server::new(vec![path_string(dir.path())], connector);
    let (conn, stuck) = MockConnection::new(LinkMode::AutoNever);

    assert!(
        server
            .start(Some(conn.with_timeout(Duration::from_secs(1))), true)
            .await
            .is_err()
    );
    assert_eq!(server.state(), ServerState::Connecting);

    server
        .set_handler_paths(vec![path_string(dir.path())])
        .await
        .unwrap();

    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(stuck.closes(), 1);
    assert_eq!(stuck.disconnects(), 0);
    assert_eq!(probes.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_when_hub_hangs_up() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();

    probe.hangup.notify_one();
    let outcome = server.wait().await.unwrap();

    assert_eq!(outcome, WaitOutcome::ConnectionClosed);
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(probe.closes(), 1);
    // The link was already down, nothing to disconnect
    assert_eq!(probe.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handle_stop_ends_wait() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();

    let handle = server.handle();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop().unwrap();
    });

    let outcome = server.wait().await.unwrap();
    stopper.await.unwrap();

    assert_eq!(outcome, WaitOutcome::Stopped);
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(probe.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handle_reconfigure_during_wait() {
    let old = handler_dir("topic=old");
    let new = handler_dir("topic=new");
    let (connector, probes) = recording_connector();
    let mut server = Server::new(vec![path_string(old.path())], connector);
    server.start(None, true).await.unwrap();

    let handle = server.handle();
    handle
        .set_handler_paths(vec![path_string(new.path())])
        .unwrap();
    handle.stop().unwrap();

    let outcome = server.wait().await.unwrap();

    assert_eq!(outcome, WaitOutcome::Stopped);
    let probes = probes.lock().unwrap();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].closes(), 1);
    assert_eq!(probes[1].subscriptions(), vec!["topic=new"]);
    assert_eq!(probes[1].closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connecting_cancels() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::AutoNever);

    let handle = server.handle();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop().unwrap();
    });

    let outcome = server.start(Some(conn), true).await.unwrap();
    stopper.await.unwrap();

    assert!(matches!(outcome, StartOutcome::Cancelled));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(probe.polls() > 1);
    assert_eq!(probe.closes(), 1);
    assert!(probe.subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_is_discarded() {
    let dir = handler_dir("topic=a");
    let mut server = Server::new(vec![path_string(dir.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::AutoAfter(3));

    server.handle().stop().unwrap();
    let outcome = server.start(Some(conn), true).await.unwrap();

    assert!(matches!(outcome, StartOutcome::Running(_)));
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(probe.subscriptions(), vec!["topic=a"]);
}

#[tokio::test(start_paused = true)]
async fn test_paths_sent_before_start_are_applied() {
    let old = handler_dir("topic=old");
    let new = handler_dir("topic=new");
    let mut server = Server::new(vec![path_string(old.path())], unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);

    let handle = server.handle();
    handle
        .set_handler_paths(vec![path_string(new.path())])
        .unwrap();
    handle.stop().unwrap();
    server.start(Some(conn), true).await.unwrap();

    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(server.handler_paths(), [path_string(new.path())]);
    assert_eq!(probe.subscriptions(), vec!["topic=new"]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_hangup_ignores_late_stop() {
    let dir = handler_dir("topic=a");
    let (connector, probes) = recording_connector();
    let mut server = Server::new(vec![path_string(dir.path())], connector);
    let (conn, first) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();

    first.hangup.notify_one();
    assert_eq!(server.wait().await.unwrap(), WaitOutcome::ConnectionClosed);

    // Arrives after the hub already closed the link
    server.handle().stop().unwrap();

    let outcome = server.start(None, true).await.unwrap();
    assert!(matches!(outcome, StartOutcome::Running(_)));
    assert_eq!(server.state(), ServerState::Running);
    assert_eq!(probes.lock().unwrap()[0].subscriptions(), vec!["topic=a"]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconfigure_restart_reports_stopped() {
    let old = handler_dir("topic=old");
    let new = handler_dir("topic=new");
    let stuck = || MockConnection::new(LinkMode::AutoNever).0;
    let mut server = Server::new(vec![path_string(old.path())], stuck);
    let (conn, first) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), true).await.unwrap();

    let handle = server.handle();
    handle
        .set_handler_paths(vec![path_string(new.path())])
        .unwrap();
    handle.stop().unwrap();

    let outcome = server.wait().await.unwrap();

    assert_eq!(outcome, WaitOutcome::Stopped);
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.connection().is_none());
    assert_eq!(first.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_without_paths_does_not_wait() {
    let mut server = Server::new(Vec::new(), unused_connector);
    let (conn, _probe) = MockConnection::new(LinkMode::Connected);

    let outcome = server.run(Some(conn), true).await.unwrap();
    assert_eq!(outcome, WaitOutcome::NotRunning);
}

#[tokio::test(start_paused = true)]
async fn test_handle_outlives_server() {
    let server = Server::new(Vec::new(), unused_connector);
    let handle = server.handle();
    drop(server);

    assert!(matches!(handle.stop(), Err(Error::ServerGone)));
}

#[tokio::test(start_paused = true)]
async fn test_drop_closes_connection() {
    let mut server = Server::new(Vec::new(), unused_connector);
    let (conn, probe) = MockConnection::new(LinkMode::Connected);
    server.start(Some(conn), false).await.unwrap();

    drop(server);
    assert_eq!(probe.closes(), 1);
}
