//! Gateway integration tests
//!
//! A mock gateway hands each accepted socket to the test, which plays the
//! server side of the protocol against a real coordinator and shard.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use chat_common::GatewayConfig;
use chat_core::Snowflake;
use chat_gateway::protocol::{
    GatewayMessage, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload, Status,
};
use chat_gateway::{Event, ShardStatus};
use integration_tests::{
    coordinator, gateway_config, message_create, ready, wait_for_event, MockGateway, TOKEN,
};
use serde_json::json;

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();

    let identify = socket.recv_op(OpCode::Identify).await.unwrap();
    let payload = identify.as_identify().unwrap();
    assert_eq!(payload.token, TOKEN);
    assert_eq!(payload.shard, [0, 1]);
    assert_eq!(payload.large_threshold, 250);

    // A heartbeat follows the identify immediately
    let heartbeat = socket.recv_op(OpCode::Heartbeat).await.unwrap();
    assert!(heartbeat.d.unwrap_or_default().is_null());
    socket.send(&GatewayMessage::heartbeat_ack()).await.unwrap();

    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    let pre_ready = wait_for_event(&mut events, |event| matches!(event, Event::PreReady { .. }))
        .await
        .unwrap();
    assert_eq!(pre_ready.shard_id, 0);
    wait_for_event(&mut events, |event| matches!(event, Event::Ready))
        .await
        .unwrap();

    let snapshot = coordinator.shard(0).unwrap().snapshot();
    assert_eq!(snapshot.status, ShardStatus::Ready);
    assert_eq!(snapshot.session_id.as_deref(), Some("abc"));
    assert_eq!(snapshot.sequence, 1);
    assert_eq!(snapshot.connect_attempts, 0);
    assert!(snapshot.latency.is_some());

    socket.send(&message_create(2)).await.unwrap();
    let dispatch = wait_for_event(&mut events, |event| {
        matches!(event, Event::Dispatch(dispatch) if dispatch.name == "MESSAGE_CREATE")
    })
    .await
    .unwrap();
    assert_eq!(dispatch.as_dispatch().unwrap().data["content"], "hi");
}

#[tokio::test]
async fn test_ready_waits_for_unavailable_guilds() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();

    let guilds = json!([{"id": "10", "unavailable": true}, {"id": "11", "unavailable": true}]);
    socket.send(&ready("abc", 1, guilds)).await.unwrap();
    socket
        .send(&GatewayMessage::dispatch("GUILD_CREATE", 2, json!({"id": "10", "name": "a"})))
        .await
        .unwrap();
    socket
        .send(&GatewayMessage::dispatch("GUILD_CREATE", 3, json!({"id": "11", "name": "b"})))
        .await
        .unwrap();

    // Ready follows the last guild, not the READY dispatch
    let mut creates_seen = 0;
    let ready_event = wait_for_event(&mut events, |event| match event {
        Event::Dispatch(dispatch) if dispatch.name == "GUILD_CREATE" => {
            creates_seen += 1;
            false
        }
        Event::Ready => true,
        _ => false,
    })
    .await
    .unwrap();
    assert_eq!(ready_event.shard_id, 0);
    assert_eq!(creates_seen, 2);
}

#[tokio::test]
async fn test_sequence_gap_warns() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    socket.send(&message_create(5)).await.unwrap();
    socket.send(&message_create(3)).await.unwrap();

    let warning = wait_for_event(&mut events, |event| matches!(event, Event::Warn(_)))
        .await
        .unwrap();
    match warning.event {
        Event::Warn(message) => assert!(message.contains("Non-consecutive")),
        other => panic!("unexpected event: {other:?}"),
    }

    wait_for_event(&mut events, |event| {
        matches!(event, Event::Dispatch(dispatch) if dispatch.sequence == Some(3))
    })
    .await
    .unwrap();
    assert_eq!(coordinator.shard(0).unwrap().snapshot().sequence, 5);
}

// ============================================================================
// Heartbeats and reconnects
// ============================================================================

#[tokio::test]
async fn test_unacknowledged_heartbeat_reconnects() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut first = gateway.accept().await.unwrap();
    first.send(&GatewayMessage::hello(50)).await.unwrap();
    first.recv_op(OpCode::Identify).await.unwrap();

    // Never acknowledge: the second timed heartbeat finds the first unacked
    let disconnect = wait_for_event(&mut events, |event| matches!(event, Event::Disconnect { .. }))
        .await
        .unwrap();
    match disconnect.event {
        Event::Disconnect { reconnect, .. } => assert!(reconnect),
        other => panic!("unexpected event: {other:?}"),
    }

    let mut second = gateway.accept().await.unwrap();
    second.send(&GatewayMessage::hello(45_000)).await.unwrap();
    second.recv_op(OpCode::Identify).await.unwrap();
    assert_eq!(coordinator.shard(0).unwrap().snapshot().connect_attempts, 2);
}

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut first = gateway.accept().await.unwrap();
    first.send(&GatewayMessage::hello(45_000)).await.unwrap();
    first.recv_op(OpCode::Identify).await.unwrap();
    first.send(&ready("abc", 1, json!([]))).await.unwrap();
    first.send(&message_create(42)).await.unwrap();
    wait_for_event(&mut events, |event| {
        matches!(event, Event::Dispatch(dispatch) if dispatch.sequence == Some(42))
    })
    .await
    .unwrap();

    first.send(&GatewayMessage::reconnect()).await.unwrap();
    assert_eq!(first.recv_close().await.unwrap(), Some(4901));

    let mut second = gateway.accept().await.unwrap();
    second.send(&GatewayMessage::hello(45_000)).await.unwrap();
    let resume = second.recv_op(OpCode::Resume).await.unwrap();
    let payload = resume.as_resume().unwrap();
    assert_eq!(payload.session_id, "abc");
    assert_eq!(payload.seq, 42);
    assert_eq!(payload.token, TOKEN);

    second
        .send(&GatewayMessage::dispatch("RESUMED", 43, json!({})))
        .await
        .unwrap();
    wait_for_event(&mut events, |event| matches!(event, Event::Resumed))
        .await
        .unwrap();
    assert_eq!(coordinator.shard(0).unwrap().status(), ShardStatus::Ready);
}

#[tokio::test]
async fn test_invalid_session_identifies_again() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    coordinator.connect();

    let mut first = gateway.accept().await.unwrap();
    first.send(&GatewayMessage::hello(45_000)).await.unwrap();
    first.recv_op(OpCode::Identify).await.unwrap();
    first.send(&ready("abc", 1, json!([]))).await.unwrap();
    first.send(&GatewayMessage::invalid_session(false)).await.unwrap();
    assert_eq!(first.recv_close().await.unwrap(), Some(1000));

    let mut second = gateway.accept().await.unwrap();
    second.send(&GatewayMessage::hello(45_000)).await.unwrap();
    second.recv_op(OpCode::Identify).await.unwrap();
    assert_eq!(coordinator.shard(0).unwrap().snapshot().session_id, None);
}

#[tokio::test]
async fn test_reconnect_request_respects_autoreconnect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let config = GatewayConfig {
        autoreconnect: false,
        ..gateway_config()
    };
    let coordinator = coordinator(&gateway.url(), config).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    socket.send(&GatewayMessage::reconnect()).await.unwrap();
    assert_eq!(socket.recv_close().await.unwrap(), Some(4901));

    let disconnect = wait_for_event(&mut events, |event| matches!(event, Event::Disconnect { .. }))
        .await
        .unwrap();
    assert!(matches!(disconnect.event, Event::Disconnect { reconnect: false, .. }));
    assert!(gateway.stays_idle(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn test_fatal_close_code_stops_shard() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.close(4004, "Authentication failed").await.unwrap();

    let disconnect = wait_for_event(&mut events, |event| matches!(event, Event::Disconnect { .. }))
        .await
        .unwrap();
    match disconnect.event {
        Event::Disconnect {
            code, reconnect, ..
        } => {
            assert_eq!(code, Some(4004));
            assert!(!reconnect);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(gateway.stays_idle(Duration::from_millis(300)).await);
    assert_eq!(coordinator.shard(0).unwrap().status(), ShardStatus::Disconnected);
}

#[tokio::test]
async fn test_disconnect_without_reconnect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    wait_for_event(&mut events, |event| matches!(event, Event::Ready))
        .await
        .unwrap();

    coordinator.disconnect(false);
    assert_eq!(socket.recv_close().await.unwrap(), Some(1000));
    wait_for_event(&mut events, |event| {
        matches!(event, Event::Disconnect { reconnect: false, .. })
    })
    .await
    .unwrap();

    assert!(gateway.stays_idle(Duration::from_millis(300)).await);
    assert_eq!(coordinator.shard(0).unwrap().snapshot().session_id, None);
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_request_guild_members_collects_chunks() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    wait_for_event(&mut events, |event| matches!(event, Event::Ready))
        .await
        .unwrap();

    let shard = coordinator.shard(0).unwrap().clone();
    let request = tokio::spawn(async move {
        let payload = RequestGuildMembersPayload {
            guild_id: Snowflake::new(10),
            query: None,
            limit: 0,
            presences: false,
            user_ids: Some(vec![Snowflake::new(20), Snowflake::new(21)]),
            nonce: None,
        };
        shard
            .request_guild_members(payload, Duration::from_secs(5))
            .await
    });

    let command = socket.recv_op(OpCode::RequestGuildMembers).await.unwrap();
    let data = command.d.unwrap();
    assert_eq!(data["guild_id"], "10");
    let nonce = data["nonce"].as_str().unwrap().to_string();

    for (index, user) in ["20", "21"].iter().enumerate() {
        socket
            .send(&GatewayMessage::dispatch(
                "GUILD_MEMBERS_CHUNK",
                2 + index as u64,
                json!({
                    "guild_id": "10",
                    "members": [{"user": {"id": user}}],
                    "chunk_index": index,
                    "chunk_count": 2,
                    "nonce": nonce,
                }),
            ))
            .await
            .unwrap();
    }

    let members = request.await.unwrap().unwrap();
    assert_eq!(members.members.len(), 2);
    assert_eq!(members.members[1]["user"]["id"], "21");
}

#[tokio::test]
async fn test_edit_status_sends_presence() {
    let mut gateway = MockGateway::start().await.unwrap();
    let coordinator = coordinator(&gateway.url(), gateway_config()).unwrap();
    let mut events = coordinator.subscribe();
    coordinator.connect();

    let mut socket = gateway.accept().await.unwrap();
    socket.send(&GatewayMessage::hello(45_000)).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.send(&ready("abc", 1, json!([]))).await.unwrap();
    wait_for_event(&mut events, |event| matches!(event, Event::Ready))
        .await
        .unwrap();

    coordinator
        .shard(0)
        .unwrap()
        .edit_status(PresenceUpdatePayload::new(Status::Dnd))
        .unwrap();

    let presence = socket.recv_op(OpCode::PresenceUpdate).await.unwrap();
    assert_eq!(presence.d.unwrap()["status"], "dnd");
}
