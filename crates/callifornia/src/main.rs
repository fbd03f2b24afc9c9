//! callifornia: headless call client.
//!
//! Usage: `callifornia <nickname> [friend]`
//!
//! Authorizes as `nickname`, calls `friend` once authorized if one is given,
//! accepts every incoming call, and logs everything that happens. Audio is
//! discarded.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use callifornia_client::{CallsClient, ClientEvent, NullAudio};
use callifornia_core::CallsConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = CallsConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CallsConfig::load().context("failed to load config")?;

    let mut args = std::env::args().skip(1);
    let nickname = args
        .next()
        .context("usage: callifornia <nickname> [friend]")?;
    let friend = args.next();
    tracing::info!(%nickname, friend = ?friend, relay = %config.server.host, "callifornia starting");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ClientEvent>();
    let audio = Arc::new(NullAudio::new(config.audio.volume, config.audio.muted));
    let client = CallsClient::start(
        config,
        move |event: ClientEvent| {
            let _ = event_tx.send(event);
        },
        audio,
    )
    .await?;

    client.authorize(&nickname)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }

            event = event_rx.recv() => {
                let Some(event) = event else { break };
                tracing::info!(?event, "event");
                on_event(&client, &nickname, friend.as_deref(), event);
            }
        }
    }

    if client.is_authorized() {
        if let Err(e) = client.logout() {
            tracing::warn!(error = %e, "logout failed");
        }
    }
    client.stop().await
}

fn on_event(client: &CallsClient, nickname: &str, friend: Option<&str>, event: ClientEvent) {
    let result = match event {
        ClientEvent::AuthorizationResult(Ok(())) => match friend {
            Some(friend) => client.start_calling(friend),
            None => Ok(()),
        },
        ClientEvent::IncomingCall { nickname: caller } => client.accept_call(&caller),
        ClientEvent::ConnectionRestored => client.authorize(nickname),
        _ => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "action failed");
    }
}
