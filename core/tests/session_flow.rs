#![allow(clippy::expect_used, clippy::unwrap_used)]

//! End-to-end behaviour of `ChatSession` against an in-memory chat server.

use std::sync::Arc;
use std::time::Duration;

use core_test_support::ScriptedConnector;
use core_test_support::load_default_config_for_test;
use core_test_support::next_server;
use core_test_support::test_auth;
use core_test_support::wait_for_event;
use futures::FutureExt;
use parley_core::ChatSession;
use parley_core::ConnectionStatus;
use parley_core::ParleyErr;
use parley_core::SessionEvent;
use parley_core::SessionPhase;
use parley_login::AuthManager;
use parley_protocol::Role;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

async fn new_session() -> (
    ChatSession,
    Arc<ScriptedConnector>,
    tokio::sync::mpsc::UnboundedReceiver<core_test_support::ServerHandle>,
    TempDir,
) {
    let home = TempDir::new().unwrap();
    let config = load_default_config_for_test(&home);
    let (connector, servers) = ScriptedConnector::new();
    let session = ChatSession::new(&config, connector.clone(), test_auth().await);
    (session, connector, servers, home)
}

fn is_connected(ev: &SessionEvent) -> bool {
    matches!(ev, SessionEvent::Connected)
}

#[tokio::test]
async fn connect_url_carries_chat_id_token_and_model() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", Some("gpt-x")).await;
    assert_eq!(session.phase(), SessionPhase::Connecting);

    let server = next_server(&mut servers).await;
    assert_eq!(server.url.path(), "/ws/chat/c1");
    assert_eq!(server.query_param("token").as_deref(), Some("test-token"));
    assert_eq!(server.query_param("model_name").as_deref(), Some("gpt-x"));
    assert_eq!(server.query_param("api_key"), None);
}

#[tokio::test]
async fn history_then_stream_then_end_builds_timeline_in_order() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let server = next_server(&mut servers).await;

    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    server.send_json(json!({"type": "full_history", "payload": [
        {"id": "B", "role": "assistant", "content": "b", "timestamp": "2025-01-01T00:00:02Z"},
        {"id": "A", "role": "user", "content": "a", "timestamp": "2025-01-01T00:00:01Z"},
    ]}));
    server.send_json(json!({"type": "chunk", "payload": "x"}));
    server.send_json(json!({"type": "event", "payload": "end_of_stream"}));

    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::StreamEnded { .. })).await;

    let timeline = session.timeline();
    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline[0].id, "A");
    assert_eq!(timeline[1].id, "B");
    assert_eq!(timeline[2].role, Role::Assistant);
    assert_eq!(timeline[2].content, "x");
    assert!(!session.is_streaming());
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn sent_message_is_forwarded_and_echo_replaces_placeholder() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let mut server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    let local_id = session.send_message("hi").expect("connected session sends");
    assert_eq!(session.timeline().len(), 1);
    assert_eq!(session.timeline()[0].id, local_id);
    assert_eq!(server.recv_text().await, "hi");

    server.send_json(json!({"type": "message", "payload": {
        "id": 17, "role": "user", "content": "hi", "timestamp": "2025-01-01T00:00:00Z"
    }}));
    wait_for_event(
        &mut session,
        |ev| matches!(ev, SessionEvent::MessageUpserted { id } if id == "17"),
    )
    .await;

    let timeline = session.timeline();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].id, "17");
    assert_eq!(session.state().optimistic_id(), None);
}

#[tokio::test]
async fn send_while_disconnected_does_nothing() {
    let (mut session, connector, _servers, _home) = new_session().await;
    assert_eq!(session.send_message("hello"), None);
    assert!(session.timeline().is_empty());
    assert_eq!(connector.open_count(), 0);
    assert_eq!(session.current_error(), None);
}

#[tokio::test]
async fn send_while_connecting_does_nothing() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let _server = next_server(&mut servers).await;
    assert_eq!(session.send_message("too early"), None);
    assert!(session.timeline().is_empty());
}

#[tokio::test]
async fn reconnect_closes_previous_socket_before_opening_the_next() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let first = next_server(&mut servers).await;
    first.send_ready();
    first.send_json(json!({"type": "full_history", "payload": [
        {"id": "old", "role": "user", "content": "from c1", "timestamp": "2025-01-01T00:00:00Z"},
    ]}));
    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::TimelineReplaced { .. })).await;
    assert_eq!(session.timeline().len(), 1);

    // Still queued on the old socket when the switch happens.
    first.send_json(json!({"type": "chunk", "payload": "late from c1"}));
    first.send_json(json!({"type": "error", "payload": "late c1 failure"}));

    session.connect("p1", "c2", None).await;
    assert!(session.timeline().is_empty());
    assert_eq!(session.phase(), SessionPhase::Connecting);
    assert_eq!(session.chat_key().map(|k| k.chat_id.as_str()), Some("c2"));

    let second = next_server(&mut servers).await;
    assert_eq!(second.url.path(), "/ws/chat/c2");
    assert_eq!(
        connector.log(),
        vec![
            "open:c1".to_string(),
            "close:c1".to_string(),
            "open:c2".to_string(),
        ]
    );

    // Nothing from the first chat leaks into the second.
    assert!(!first.try_send_text(r#"{"type":"chunk","payload":"after shutdown"}"#));
    second.send_ready();
    let ev = wait_for_event(&mut session, |_| true).await;
    assert_eq!(ev, SessionEvent::Connected);
    assert!(session.timeline().is_empty());
    assert!(!session.is_streaming());
    assert_eq!(session.current_error(), None);

    second.send_json(json!({"type": "chunk", "payload": "c2"}));
    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::StreamDelta { .. })).await;
    let contents: Vec<&str> = session.timeline().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["c2"]);
}

#[tokio::test]
async fn abandoned_switch_does_not_block_reconnecting() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let first = next_server(&mut servers).await;
    first.send_ready();
    wait_for_event(&mut session, is_connected).await;

    // Polled once, then dropped while the old adapter is still shutting down.
    assert!(session.connect("p1", "c2", None).now_or_never().is_none());
    assert_eq!(session.chat_key(), None);

    session.connect("p1", "c1", None).await;
    let again = next_server(&mut servers).await;
    assert_eq!(again.url.path(), "/ws/chat/c1");
    assert_eq!(connector.open_count(), 2);

    again.send_ready();
    wait_for_event(&mut session, is_connected).await;
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn identical_connect_while_connected_is_a_no_op() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", Some("m")).await;
    let server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    session.connect("p1", "c1", Some("m")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.open_count(), 1);
    assert_eq!(connector.log(), vec!["open:c1".to_string()]);
    assert_eq!(session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn different_model_is_a_different_attachment() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", Some("m1")).await;
    let _first = next_server(&mut servers).await;

    session.connect("p1", "c1", Some("m2")).await;
    let second = next_server(&mut servers).await;
    assert_eq!(second.query_param("model_name").as_deref(), Some("m2"));
    assert_eq!(connector.open_count(), 2);
}

#[tokio::test]
async fn cancel_generation_sends_control_frame_and_keeps_stream_open() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    assert!(!session.cancel_generation());

    session.connect("p1", "c1", None).await;
    let mut server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;
    server.send_json(json!({"type": "chunk", "payload": "long answ"}));
    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::StreamDelta { .. })).await;

    assert!(session.cancel_generation());
    assert_eq!(server.recv_text().await, r#"{"type":"cancel"}"#);
    assert_eq!(session.phase(), SessionPhase::Streaming);

    server.send_json(json!({"type": "event", "payload": "end_of_stream"}));
    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::StreamEnded { .. })).await;
    assert_eq!(session.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn error_frame_sets_error_and_connect_is_accepted_again() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    server.send_json(json!({"type": "error", "payload": "quota exceeded"}));
    let ev = wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::Error(_))).await;
    assert_eq!(
        ev,
        SessionEvent::Error(ParleyErr::Server("quota exceeded".to_string()))
    );
    assert_eq!(session.phase(), SessionPhase::Error);

    session.connect("p1", "c1", None).await;
    let _again = next_server(&mut servers).await;
    assert_eq!(connector.open_count(), 2);
    assert_eq!(session.current_error(), None);
    assert_eq!(session.phase(), SessionPhase::Connecting);
}

#[tokio::test]
async fn dropped_socket_is_an_abnormal_close() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    drop(server);

    let ev = wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::Error(_))).await;
    assert_eq!(
        ev,
        SessionEvent::Error(ParleyErr::AbnormalClose {
            code: 1006,
            reason: String::new()
        })
    );
    let ev = wait_for_event(&mut session, |_| true).await;
    assert!(matches!(ev, SessionEvent::Disconnected { code: 1006, .. }));
    assert_eq!(session.next_event().await, None);
    assert_eq!(session.status(), ConnectionStatus::Error);
}

#[tokio::test]
async fn normal_server_close_disconnects() {
    let (mut session, _connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let server = next_server(&mut servers).await;
    server.send_ready();
    wait_for_event(&mut session, is_connected).await;

    server.close(1000, "bye");
    let ev = wait_for_event(&mut session, |ev| {
        matches!(ev, SessionEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(
        ev,
        SessionEvent::Disconnected {
            code: 1000,
            reason: "bye".to_string()
        }
    );
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert_eq!(session.current_error(), None);
}

#[tokio::test]
async fn missing_credential_fails_without_opening_a_socket() {
    let home = TempDir::new().unwrap();
    let config = load_default_config_for_test(&home);
    let (connector, _servers) = ScriptedConnector::new();
    let auth = AuthManager::pending(Duration::from_secs(1)).await.unwrap();
    auth.resolve(None).await.unwrap();
    let mut session = ChatSession::new(&config, connector.clone(), Arc::new(auth));

    session.connect("p1", "c1", None).await;
    let ev = wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::Error(_))).await;
    assert!(matches!(
        ev,
        SessionEvent::Error(ParleyErr::MissingCredential(_))
    ));
    assert_eq!(connector.open_count(), 0);
    assert_eq!(session.phase(), SessionPhase::Error);
}

#[tokio::test]
async fn open_failure_surfaces_transport_error() {
    let (mut session, connector, _servers, _home) = new_session().await;
    connector.fail_next_open(ParleyErr::Transport("connection refused".to_string()));

    session.connect("p1", "c1", None).await;
    let ev = wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::Error(_))).await;
    assert_eq!(
        ev,
        SessionEvent::Error(ParleyErr::Transport("connection refused".to_string()))
    );
    let ev = wait_for_event(&mut session, |_| true).await;
    assert!(matches!(ev, SessionEvent::Disconnected { code: 1006, .. }));
    assert_eq!(
        session.current_error(),
        Some(&ParleyErr::Transport("connection refused".to_string()))
    );
}

#[tokio::test]
async fn disconnect_keeps_timeline_and_closes_socket() {
    let (mut session, connector, mut servers, _home) = new_session().await;
    session.connect("p1", "c1", None).await;
    let server = next_server(&mut servers).await;
    server.send_ready();
    server.send_json(json!({"type": "message", "payload": {
        "id": "m1", "role": "assistant", "content": "kept"
    }}));
    wait_for_event(&mut session, |ev| matches!(ev, SessionEvent::MessageUpserted { .. })).await;

    session.disconnect().await;

    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert_eq!(session.timeline().len(), 1);
    assert_eq!(session.chat_key(), None);
    assert!(connector.log().contains(&"close:c1".to_string()));
    assert_eq!(
        session.next_event().await,
        Some(SessionEvent::Disconnected {
            code: 1000,
            reason: String::new()
        })
    );
    assert_eq!(session.next_event().await, None);
    assert_eq!(session.send_message("after"), None);
}
