//! End-to-end gateway session tests
//!
//! Each test drives a `Shard` against the in-process scripted transport,
//! playing the service's side of the conversation.

use std::sync::Arc;
use std::time::Duration;

use ember_core::{Intents, Snowflake};
use ember_gateway::protocol::OpCode;
use ember_gateway::{
    EventSink, GatewayConfig, InMemoryMemberCache, MemberCache, MemberSelector, Shard, ShardStatus,
};
use integration_tests::{
    accept, chunk_json, test_transport, wait_for_status, wait_until, CollectingSink, ServerHandle,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

fn test_config() -> GatewayConfig {
    GatewayConfig::new("test-token")
        .with_intents(Intents::default() | Intents::GUILD_MEMBERS)
        .with_reconnect_policy(5, Duration::from_millis(10))
}

#[allow(clippy::type_complexity)]
fn build_shard(
    config: GatewayConfig,
) -> (
    Shard,
    Arc<CollectingSink>,
    Arc<InMemoryMemberCache>,
    mpsc::UnboundedReceiver<ServerHandle>,
) {
    let (transport, accepted) = test_transport();
    let sink = Arc::new(CollectingSink::default());
    let cache = Arc::new(InMemoryMemberCache::new());
    let shard = Shard::new(
        config,
        transport,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        Arc::clone(&cache) as Arc<dyn MemberCache>,
    );
    (shard, sink, cache, accepted)
}

/// Walk a fresh shard to Ready and return its connection
async fn open_to_ready(
    shard: &Shard,
    accepted: &mut mpsc::UnboundedReceiver<ServerHandle>,
    interval_ms: u64,
    session_id: &str,
) -> ServerHandle {
    shard.open().await.unwrap();
    let mut server = accept(accepted).await;
    server.hello(interval_ms);
    server.expect_op(2).await;
    server.ready(1, session_id, &[]);
    wait_for_status(shard, ShardStatus::Ready).await;
    server
}

#[tokio::test(start_paused = true)]
async fn handshake_walks_the_states_in_order() {
    let (shard, sink, _cache, mut accepted) = build_shard(test_config());
    assert_eq!(shard.status(), ShardStatus::Unconnected);

    shard.open().await.unwrap();
    assert_eq!(shard.status(), ShardStatus::WaitingForHello);

    // a second open on a live connection is rejected
    assert!(shard.open().await.is_err());

    let mut server = accept(&mut accepted).await;
    server.hello(600_000);

    let identify = server.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "test-token");
    assert!(identify["d"]["intents"].is_u64());
    wait_for_status(&shard, ShardStatus::WaitingForReady).await;

    server.ready(1, "session-1", &[]);
    wait_for_status(&shard, ShardStatus::Ready).await;
    assert_eq!(shard.session_id().as_deref(), Some("session-1"));
    assert_eq!(shard.sequence(), Some(1));

    // dispatches advance the sequence and reach the sink exactly once
    server.dispatch("MESSAGE_CREATE", 2, json!({ "id": "55" }));
    wait_until(|| sink.events().len() == 2).await;
    assert_eq!(shard.sequence(), Some(2));
    assert_eq!(sink.event_types(), vec!["READY", "MESSAGE_CREATE"]);

    // a stale sequence never rolls the counter backwards
    server.dispatch("MESSAGE_CREATE", 1, json!({ "id": "56" }));
    wait_until(|| sink.events().len() == 3).await;
    assert_eq!(shard.sequence(), Some(2));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn resume_eligible_close_yields_resume_not_identify() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-r").await;

    server.close_with(4000, "unknown error");

    let mut server2 = accept(&mut accepted).await;
    server2.hello(600_000);
    let resume = server2.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-r");
    assert_eq!(resume["d"]["seq"], 1);
    assert_eq!(resume["d"]["token"], "test-token");

    server2.dispatch("RESUMED", 2, json!({}));
    wait_for_status(&shard, ShardStatus::Ready).await;
    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn non_resumable_close_clears_session_before_reconnect() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-i").await;

    server.close_with(4007, "invalid sequence");

    let mut server2 = accept(&mut accepted).await;
    // the stored session was cleared before the reconnect attempt
    assert!(shard.session_id().is_none());
    assert!(shard.sequence().is_none());

    server2.hello(600_000);
    let identify = server2.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "test-token");
    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn missed_heartbeat_ack_forces_exactly_one_reconnect_cycle() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 100, "sess-h").await;

    // never acknowledge; the next scheduled beat detects the zombied
    // connection and restarts it
    let (code, _reason) = server.expect_close().await;
    assert_eq!(code, 1012);

    let mut server2 = accept(&mut accepted).await;
    server2.hello(600_000);
    let resume = server2.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-h");

    // one cycle only: no further connection attempts are in flight
    assert!(accepted.try_recv().is_err());
    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn server_reconnect_request_resumes() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-q").await;

    server.send_json(&json!({ "op": 7 }));
    let (code, _reason) = server.expect_close().await;
    assert_eq!(code, 1012);

    let mut server2 = accept(&mut accepted).await;
    server2.hello(600_000);
    let resume = server2.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-q");
    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn non_resumable_invalid_session_reidentifies() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-x").await;

    server.send_json(&json!({ "op": 9, "d": false }));
    let (code, _reason) = server.expect_close().await;
    assert_eq!(code, 1000);

    let mut server2 = accept(&mut accepted).await;
    assert!(shard.session_id().is_none());
    server2.hello(600_000);
    server2.expect_op(2).await;
    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn user_close_clears_session_and_never_reconnects() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-u").await;

    shard.close().await;
    let (code, _reason) = server.expect_close().await;
    assert_eq!(code, 1000);
    assert_eq!(shard.status(), ShardStatus::Disconnected);
    assert!(shard.session_id().is_none());

    // the dead connection must not trigger a reconnect
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(accepted.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn non_graceful_user_close_preserves_session() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-p").await;

    shard.close_with_code(1012, "restarting").await;
    let (code, _reason) = server.expect_close().await;
    assert_eq!(code, 1012);

    // token and sequence survive for a later resume
    assert_eq!(shard.session_id().as_deref(), Some("sess-p"));
    assert_eq!(shard.sequence(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn fatal_close_surfaces_terminal_error() {
    let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::clone(&captured);
    let config = test_config()
        .with_close_handler(Arc::new(move |err| errors.lock().push(err.to_string())));

    let (shard, _sink, _cache, mut accepted) = build_shard(config);
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-f").await;

    server.close_with(4004, "authentication failed");
    wait_until(|| !captured.lock().is_empty()).await;

    assert!(captured.lock()[0].contains("authentication failed"));
    assert_eq!(shard.status(), ShardStatus::Disconnected);

    // fatal codes are never retried
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(accepted.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn disabled_auto_reconnect_reports_and_stops() {
    let captured: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::clone(&captured);
    let config = test_config()
        .with_auto_reconnect(false)
        .with_close_handler(Arc::new(move |err| errors.lock().push(err.to_string())));

    let (shard, _sink, _cache, mut accepted) = build_shard(config);
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-n").await;

    server.close_with(4000, "unknown error");
    wait_until(|| !captured.lock().is_empty()).await;

    assert_eq!(shard.status(), ShardStatus::Disconnected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(accepted.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn filtered_member_request_end_to_end() {
    let (shard, _sink, cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 30_000, "sess-c").await;

    let request = {
        let shard = shard.clone();
        tokio::spawn(async move {
            shard
                .request_members(
                    Snowflake::new(42),
                    MemberSelector::filter(|member| member.user.id.into_inner() % 2 == 0),
                )
                .await
        })
    };

    let frame = server.expect_op(8).await;
    assert_eq!(frame["d"]["guild_id"], "42");
    assert_eq!(frame["d"]["query"], "");
    assert_eq!(frame["d"]["limit"], 0);
    let nonce = frame["d"]["nonce"].as_str().unwrap().to_string();

    // five chunks of two members each: ids 0..=9
    for index in 0..5u64 {
        server.dispatch(
            "GUILD_MEMBERS_CHUNK",
            2 + index,
            chunk_json(
                42,
                &nonce,
                &[index * 2, index * 2 + 1],
                u32::try_from(index).unwrap(),
                5,
            ),
        );
    }

    let members = request.await.unwrap().unwrap();
    let ids: Vec<u64> = members.iter().map(|m| m.user.id.into_inner()).collect();
    assert_eq!(ids, vec![0, 2, 4, 6, 8]);

    // the write-through cache saw every member regardless of the filter
    assert_eq!(cache.guild_len(Snowflake::new(42)), 10);

    // a straggler with the retired nonce is a correlation miss
    server.dispatch("GUILD_MEMBERS_CHUNK", 10, chunk_json(42, &nonce, &[99], 5, 6));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.guild_len(Snowflake::new(42)), 10);

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn member_stream_cancellation_makes_later_chunks_misses() {
    let (shard, _sink, cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-s").await;

    let mut stream = shard
        .request_members_stream(Snowflake::new(7), MemberSelector::All)
        .await
        .unwrap();

    let frame = server.expect_op(8).await;
    let nonce = frame["d"]["nonce"].as_str().unwrap().to_string();

    server.dispatch("GUILD_MEMBERS_CHUNK", 2, chunk_json(7, &nonce, &[1], 0, 3));
    let first = stream.next_member().await.unwrap();
    assert_eq!(first.user.id.into_inner(), 1);

    stream.cancel();
    assert_eq!(shard.chunker().pending_requests(), 0);

    // chunks after cancellation leave no trace
    server.dispatch("GUILD_MEMBERS_CHUNK", 3, chunk_json(7, &nonce, &[2], 1, 3));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.guild_len(Snowflake::new(7)), 1);

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn member_requests_are_rejected_before_ready() {
    let (shard, _sink, _cache, _accepted) = build_shard(test_config());
    let err = shard
        .send(OpCode::RequestGuildMembers, json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not ready"));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_carries_sequence_and_latency_updates() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 100, "sess-l").await;

    // every beat carries the last received sequence
    let beat = server.expect_op(1).await;
    assert_eq!(beat["d"], 1);

    server.heartbeat_ack();
    wait_until(|| shard.latency().is_some()).await;

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn server_heartbeat_request_triggers_immediate_beat() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    let mut server = open_to_ready(&shard, &mut accepted, 600_000, "sess-b").await;

    server.send_json(&json!({ "op": 1 }));
    let beat = server.expect_op(1).await;
    assert_eq!(beat["d"], 1);

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn binary_frames_are_inflated_before_decode() {
    let (shard, sink, _cache, mut accepted) = build_shard(test_config());
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-z").await;

    server.send_zlib(&json!({ "op": 0, "t": "MESSAGE_CREATE", "s": 2, "d": { "id": "9" } }));
    wait_until(|| sink.events().len() == 2).await;
    assert_eq!(sink.events()[1].event_type, "MESSAGE_CREATE");
    assert_eq!(shard.sequence(), Some(2));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_skipped_without_killing_the_session() {
    let (shard, sink, _cache, mut accepted) = build_shard(test_config());
    let server = open_to_ready(&shard, &mut accepted, 600_000, "sess-m").await;

    server.send_text("not json at all");
    server.dispatch("MESSAGE_CREATE", 2, json!({ "id": "1" }));

    wait_until(|| sink.events().len() == 2).await;
    assert_eq!(shard.status(), ShardStatus::Ready);

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn availability_follows_lifecycle_events() {
    let (shard, _sink, _cache, mut accepted) = build_shard(test_config());
    shard.open().await.unwrap();
    let mut server = accept(&mut accepted).await;
    server.hello(600_000);
    server.expect_op(2).await;
    server.ready(1, "sess-a", &[100, 101]);
    wait_for_status(&shard, ShardStatus::Ready).await;

    let tracker = shard.guild_tracker();
    assert!(tracker.is_pending(0, Snowflake::new(100)));
    assert!(tracker.is_pending(0, Snowflake::new(101)));

    // full state for guild 100 arrives
    server.dispatch("GUILD_CREATE", 2, json!({ "id": "100", "name": "alpha" }));
    wait_until(|| !tracker.is_pending(0, Snowflake::new(100))).await;
    assert!(tracker.is_pending(0, Snowflake::new(101)));
    assert!(!tracker.is_unavailable(Snowflake::new(100)));

    // guild 101 goes down instead
    server.dispatch("GUILD_DELETE", 3, json!({ "id": "101", "unavailable": true }));
    wait_until(|| tracker.is_unavailable(Snowflake::new(101))).await;
    assert!(!tracker.is_pending(0, Snowflake::new(101)));

    // and comes back
    server.dispatch("GUILD_CREATE", 4, json!({ "id": "101", "name": "beta" }));
    wait_until(|| !tracker.is_unavailable(Snowflake::new(101))).await;

    shard.close().await;
}
