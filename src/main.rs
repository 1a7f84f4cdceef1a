//! eth-pubsub entry point.
//!
//! Connects to a node over WebSocket, subscribes to the configured kinds
//! and logs every notification until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use eth_pubsub::config::ClientConfig;
use eth_pubsub::{RpcClient, SubscriptionToken, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config =
        ClientConfig::from_env().map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;
    tracing::info!(url = %config.ws_url, kinds = config.subscribe_kinds.len(), "starting eth-pubsub");

    let transport = WsTransport::new(config.ws_url.clone(), config.connect_timeout);
    let client = RpcClient::new(Arc::new(transport), &config);
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.ws_url))?;

    let mut tokens: Vec<SubscriptionToken> = Vec::with_capacity(config.subscribe_kinds.len());
    let mut readers = Vec::with_capacity(config.subscribe_kinds.len());
    for kind in &config.subscribe_kinds {
        let mut subscription = client
            .eth_subscribe(kind)
            .await
            .with_context(|| format!("subscribing to {kind}"))?;
        let token = subscription.token().clone();
        tracing::info!(%kind, %token, "subscribed");
        tokens.push(token.clone());

        let kind = kind.name();
        readers.push(tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                tracing::info!(kind, %token, %payload, "notification");
            }
            tracing::info!(kind, %token, "subscription ended");
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    for token in &tokens {
        match client.unsubscribe(token).await {
            Ok(removed) => tracing::info!(%token, removed, "unsubscribed"),
            Err(err) => tracing::warn!(%token, error = %err, "unsubscribe failed"),
        }
    }
    client.close().await?;

    for reader in readers {
        if let Err(err) = reader.await {
            tracing::warn!(error = %err, "notification reader panicked");
        }
    }

    let metrics = client.metrics();
    tracing::info!(?metrics, "stopped");
    Ok(())
}

/// Installs the global subscriber. `LOG_FORMAT=json` switches to JSON
/// lines; `RUST_LOG` controls the filter (default `info`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
