//! Umbra shadow manager daemon.
//!
//! Wires the local pub/sub bus, the embedded shadow store, and the cloud
//! MQTT session into a single binary that runs on edge gateways.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{Event, Packet};
use tracing_subscriber::EnvFilter;

use um_channel::{Channel, LocalBus, MockChannel, MqttChannel};
use um_shadowd::auth::AllowAll;
use um_shadowd::config::ServiceConfig;
use um_shadowd::orchestrator::{Dependencies, ShadowManager};
use um_shadowd::sync::cloud::{CloudClient, MqttCloudClient, UnconfiguredCloudClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "um-shadowd starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/umbra/shadowd.toml".to_string());

    let config = match ServiceConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration rejected, service errored");
            anyhow::bail!("{e}");
        }
    };
    tracing::info!(thing_name = %config.thing_name, "config loaded");

    // ── Local pub/sub bus ───────────────────────────────────────
    let bus = Arc::new(LocalBus::new());

    // ── Cloud session (optional) ────────────────────────────────
    let mut mqtt_parts = None;
    let (cloud_channel, cloud_client): (Arc<dyn Channel>, Arc<dyn CloudClient>) =
        match &config.mqtt {
            Some(mqtt_config) => {
                let (channel, eventloop) = MqttChannel::new(mqtt_config)
                    .map_err(|e| anyhow::anyhow!("cloud session setup failed: {e}"))?;
                let channel: Arc<dyn Channel> = Arc::new(channel);
                let client = Arc::new(MqttCloudClient::new(channel.clone()));
                mqtt_parts = Some((eventloop, client.clone()));
                (channel, client)
            }
            // No cloud session configured: serve local clients only.
            None => (Arc::new(MockChannel::new()), Arc::new(UnconfiguredCloudClient)),
        };

    // ── Install and start the service ───────────────────────────
    let manager = match ShadowManager::install(
        config,
        Dependencies {
            bus: bus.clone(),
            cloud_channel,
            cloud_client,
            authorizer: Arc::new(AllowAll),
        },
    )
    .await
    {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(error = %e, "install failed, service errored");
            anyhow::bail!("{e}");
        }
    };

    manager.post_inject().await;
    manager.startup().await.map_err(|e| anyhow::anyhow!("{e}"))?;

    // ── Drive the cloud event loop ──────────────────────────────
    let cloud_task = mqtt_parts.map(|(mut eventloop, client)| {
        let manager = manager.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("cloud session connected");
                        manager.on_connected().await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !client.handle_response(&publish.topic, &publish.payload).await {
                            manager
                                .handle_cloud_message(&publish.topic, &publish.payload)
                                .await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "cloud session lost, reconnecting in 5s");
                        manager.on_disconnected().await;
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        })
    });

    tracing::info!("um-shadowd ready");

    // ── Graceful shutdown on SIGINT/SIGTERM ─────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    if let Some(task) = cloud_task {
        task.abort();
    }
    manager.shutdown().await;

    tracing::info!("um-shadowd stopped");
    Ok(())
}
