//! End-to-end tests of the client against the in-memory transport.
#![allow(clippy::panic, missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};

use eth_pubsub::config::ClientConfig;
use eth_pubsub::{
    ClientError, ConnectionState, MemoryPeer, MemoryTransport, RpcClient, SubscriptionToken,
};

const TOKEN: &str = "0xcd0c3e8af590364c09d0fa6a1210faf5";

async fn connected_with(config: &ClientConfig) -> (RpcClient, MemoryPeer) {
    let (transport, peer) = MemoryTransport::pair();
    let client = RpcClient::new(Arc::new(transport), config);
    let Ok(()) = client.connect().await else {
        panic!("connect failed");
    };
    (client, peer)
}

async fn connected() -> (RpcClient, MemoryPeer) {
    connected_with(&ClientConfig::default()).await
}

fn parse(frame: &str) -> Value {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        panic!("frame is not json: {frame}");
    };
    value
}

/// Reads the next request and answers it with `result`. Returns the request.
async fn answer(peer: &mut MemoryPeer, result: Value) -> Value {
    let Some(frame) = peer.next_sent().await else {
        panic!("client sent nothing");
    };
    let request = parse(&frame);
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    assert!(peer.push(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()));
    request
}

fn notification(token: &str, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": token, "result": result}
    })
    .to_string()
}

/// Round-trips one call so every frame pushed before it has been routed.
async fn sync(client: &RpcClient, peer: &mut MemoryPeer) {
    let (result, _) = tokio::join!(
        client.call("web3_clientVersion", vec![]),
        answer(peer, json!("Geth/v1.13"))
    );
    let Ok(version) = result else {
        panic!("sync call failed: {result:?}");
    };
    assert_eq!(version, json!("Geth/v1.13"));
}

#[tokio::test]
async fn subscribe_frame_and_token_binding() {
    let (client, mut peer) = connected().await;

    let server = async {
        let Some(frame) = peer.next_sent().await else {
            panic!("client sent nothing");
        };
        assert_eq!(
            frame,
            r#"{"jsonrpc":"2.0","method":"eth_subscribe","params":["newPendingTransactions"],"id":1}"#
        );
        assert!(peer.push(format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{TOKEN}"}}"#)));
    };
    let (subscribed, ()) = tokio::join!(client.new_pending_transactions_notifications(), server);

    let Ok(subscription) = subscribed else {
        panic!("subscribe failed: {subscribed:?}");
    };
    assert_eq!(subscription.token().as_str(), TOKEN);
    assert_eq!(subscription.request_id().get(), 1);
    assert_eq!(client.active_subscriptions(), 1);
}

#[tokio::test]
async fn syncing_subscribe_sends_syncing_param() {
    let (client, mut peer) = connected().await;
    let (subscribed, request) =
        tokio::join!(client.syncing_status_notifications(), answer(&mut peer, json!("0x1")));
    assert!(subscribed.is_ok());
    assert_eq!(request.get("method"), Some(&json!("eth_subscribe")));
    assert_eq!(request.get("params"), Some(&json!(["syncing"])));
}

#[tokio::test]
async fn notifications_arrive_in_order() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    for number in ["0x1", "0x2", "0x3"] {
        assert!(peer.push(notification(TOKEN, json!({"number": number}))));
    }

    for number in ["0x1", "0x2", "0x3"] {
        let Some(header) = heads.next().await else {
            panic!("stream ended early");
        };
        assert_eq!(header, json!({"number": number}));
    }
    assert_eq!(heads.try_recv(), None);
}

#[tokio::test]
async fn unknown_token_notification_is_discarded() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    assert!(peer.push(notification("0xdeadbeef", json!({"number": "0x9"}))));
    sync(&client, &mut peer).await;

    assert_eq!(heads.try_recv(), None);
    assert_eq!(client.metrics().orphan_notifications, 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn close_while_subscribe_pending_fails_with_connection_lost() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.new_pending_transactions_notifications().await })
    };
    let Some(_frame) = peer.next_sent().await else {
        panic!("subscribe was not sent");
    };
    peer.close(1006, "server went away");

    let Ok(result) = pending.await else {
        panic!("subscribe task panicked");
    };
    let Err(ClientError::ConnectionLost(_)) = result else {
        panic!("expected connection lost, got {result:?}");
    };

    // The live stream closes rather than erroring.
    assert_eq!(heads.next().await, None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.active_subscriptions(), 0);
    assert_eq!(client.metrics().connection_losses, 1);
}

#[tokio::test]
async fn socket_error_fails_pending_calls() {
    let (client, mut peer) = connected().await;
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call("eth_blockNumber", vec![]).await })
    };
    let Some(_frame) = peer.next_sent().await else {
        panic!("call was not sent");
    };
    peer.fail("connection reset by peer");

    let Ok(Err(err)) = pending.await else {
        panic!("expected call failure");
    };
    assert!(err.is_connection_error());
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn concurrent_subscribes_get_distinct_ids_and_tokens() {
    const COUNT: usize = 8;
    let (client, mut peer) = connected().await;

    let mut tasks = Vec::with_capacity(COUNT);
    for _ in 0..COUNT {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.new_heads_notifications().await }));
    }

    let mut ids = HashSet::new();
    for _ in 0..COUNT {
        let Some(frame) = peer.next_sent().await else {
            panic!("missing subscribe frame");
        };
        let Some(id) = parse(&frame).get("id").and_then(Value::as_u64) else {
            panic!("frame without id: {frame}");
        };
        assert!(ids.insert(id), "id {id} issued twice");
        assert!(peer.push(format!(r#"{{"jsonrpc":"2.0","id":{id},"result":"0x{id:x}"}}"#)));
    }

    let mut tokens = HashSet::new();
    for task in tasks {
        let Ok(Ok(subscription)) = task.await else {
            panic!("subscribe failed");
        };
        assert!(tokens.insert(subscription.token().clone()));
        assert!(ids.contains(&subscription.request_id().get()));
    }
    assert_eq!(tokens.len(), COUNT);
    assert_eq!(client.active_subscriptions(), COUNT);
}

#[tokio::test]
async fn reconnect_restarts_ids_in_new_epoch() {
    let (client, mut peer) = connected().await;
    sync(&client, &mut peer).await;
    assert_eq!(client.epoch(), 1);

    peer.close(1001, "going away");
    let mut state = client.watch_state();
    let disconnected = state
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await
        .is_ok();
    assert!(disconnected);

    let Ok(()) = client.connect().await else {
        panic!("reconnect failed");
    };
    assert_eq!(client.epoch(), 2);
    assert_eq!(peer.connect_count(), 2);

    let (result, request) = tokio::join!(
        client.call("eth_chainId", vec![]),
        answer(&mut peer, json!("0x1"))
    );
    assert!(result.is_ok());
    assert_eq!(request.get("id"), Some(&json!(1)));
}

#[tokio::test]
async fn unsubscribe_uses_paired_method_and_ends_stream() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };
    let token = heads.token().clone();

    let (removed, request) = tokio::join!(client.unsubscribe(&token), answer(&mut peer, json!(true)));
    let Ok(true) = removed else {
        panic!("unsubscribe failed: {removed:?}");
    };
    assert_eq!(request.get("method"), Some(&json!("eth_unsubscribe")));
    assert_eq!(request.get("params"), Some(&json!([TOKEN])));

    assert_eq!(heads.next().await, None);
    assert_eq!(client.active_subscriptions(), 0);

    // Late pushes for the removed token are orphans.
    assert!(peer.push(notification(TOKEN, json!({}))));
    sync(&client, &mut peer).await;
    assert_eq!(client.metrics().orphan_notifications, 1);
}

#[tokio::test]
async fn refused_unsubscribe_keeps_stream() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    let token = SubscriptionToken::from(TOKEN);
    let (removed, _) = tokio::join!(client.unsubscribe(&token), answer(&mut peer, json!(false)));
    let Ok(false) = removed else {
        panic!("expected false, got {removed:?}");
    };

    assert!(peer.push(notification(TOKEN, json!("still bound"))));
    assert_eq!(heads.next().await, Some(json!("still bound")));
}

#[tokio::test]
async fn rejected_subscribe_surfaces_rpc_error() {
    let (client, mut peer) = connected().await;
    let server = async {
        let Some(frame) = peer.next_sent().await else {
            panic!("client sent nothing");
        };
        let id = parse(&frame).get("id").cloned().unwrap_or(Value::Null);
        let error = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32000, "message": "notifications not supported"}
        });
        assert!(peer.push(error.to_string()));
    };
    let (subscribed, ()) = tokio::join!(client.new_heads_notifications(), server);

    let Err(ClientError::Rpc { code, message, .. }) = subscribed else {
        panic!("expected rpc error, got {subscribed:?}");
    };
    assert_eq!(code, -32000);
    assert_eq!(message, "notifications not supported");
    assert_eq!(client.active_subscriptions(), 0);
}

#[tokio::test]
async fn malformed_frame_does_not_disturb_pending_work() {
    let (client, mut peer) = connected().await;
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call("eth_gasPrice", vec![]).await })
    };
    let Some(frame) = peer.next_sent().await else {
        panic!("call was not sent");
    };
    let id = parse(&frame).get("id").cloned().unwrap_or(Value::Null);

    assert!(peer.push("{not json"));
    assert!(peer.push(json!({"jsonrpc": "2.0", "id": id, "result": "0x3b9aca00"}).to_string()));

    let Ok(Ok(price)) = pending.await else {
        panic!("call failed");
    };
    assert_eq!(price, json!("0x3b9aca00"));
    assert_eq!(client.metrics().malformed_frames, 1);
}

#[tokio::test(start_paused = true)]
async fn response_after_timeout_is_stale() {
    let config = ClientConfig {
        request_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let (client, mut peer) = connected_with(&config).await;

    let Err(ClientError::Timeout) = client.call("eth_syncing", vec![]).await else {
        panic!("expected timeout");
    };
    assert_eq!(client.pending_requests(), 0);

    // The server answers late; the response no longer matches anything.
    answer(&mut peer, json!(false)).await;
    sync(&client, &mut peer).await;

    let metrics = client.metrics();
    assert_eq!(metrics.stale_responses, 1);
    assert_eq!(metrics.responses_matched, 1);
}

#[tokio::test]
async fn bounded_buffer_drops_overflow() {
    let config = ClientConfig {
        subscription_buffer: Some(2),
        ..ClientConfig::default()
    };
    let (client, mut peer) = connected_with(&config).await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    for n in 0..4 {
        assert!(peer.push(notification(TOKEN, json!(n))));
    }
    sync(&client, &mut peer).await;

    assert_eq!(heads.try_recv(), Some(json!(0)));
    assert_eq!(heads.try_recv(), Some(json!(1)));
    assert_eq!(heads.try_recv(), None);
    assert_eq!(client.metrics().dropped_notifications, 2);
}

#[tokio::test]
async fn close_ends_streams_without_counting_a_loss() {
    let (client, mut peer) = connected().await;
    let (subscribed, _) =
        tokio::join!(client.new_heads_notifications(), answer(&mut peer, json!(TOKEN)));
    let Ok(mut heads) = subscribed else {
        panic!("subscribe failed");
    };

    let Ok(()) = client.close().await else {
        panic!("close failed");
    };
    assert_eq!(heads.next().await, None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.metrics().connection_losses, 0);

    let Err(ClientError::NotConnected(ConnectionState::Disconnected)) =
        client.call("eth_chainId", vec![]).await
    else {
        panic!("expected not connected");
    };
}
