use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;

use gateway_connector::metrics::METRICS;
use gateway_connector::{Config, GatewayRegistry};

const DEFAULT_CONFIG: &str = "config.json";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Standalone monitor for the configured gateways.
//
// Responsibilities:
// - Initialize cryptography backend (rustls) for wss:// gateways
// - Load configuration
// - Connect and authenticate every enabled gateway
// - Log push traffic and periodic metrics
// - Keep the process alive indefinitely
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls >= 0.23 requires an explicit CryptoProvider, installed once
    // before any TLS connection is made.
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Arc::new(load_config(&path)?);

    let log_push = config
        .debug
        .as_ref()
        .is_some_and(|d| d.log_push.unwrap_or(false));
    let metrics_interval = Duration::from_secs(
        config
            .debug
            .as_ref()
            .and_then(|d| d.metrics_interval_secs)
            .unwrap_or(10),
    );

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async move {
        loop {
            sleep(metrics_interval).await;
            info!("[METRICS] {}", METRICS.summary());
        }
    });

    let registry = GatewayRegistry::new(config.clone(), config.connection.clone());
    let mut listeners = Vec::new();

    for gateway in config.gateways.iter().filter(|g| g.enabled) {
        let id = gateway.id.as_str();
        info!("Connecting to gateway {} ({})", id, gateway.url);

        let connection = match registry.connect(id).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("[{}] {}", id, e);
                continue;
            }
        };

        let gateway_id = id.to_string();
        listeners.push(registry.on_connection_state_change(id, move |state| {
            info!("[{}] state: {}", gateway_id, state)
        }));

        match connection.get_connected_sensors().await {
            Ok(sensors) => {
                for (serial, sensor) in &sensors {
                    info!(
                        "[{}] sensor {} part={} rate={} samples={}",
                        id,
                        serial,
                        sensor.part_num.as_deref().unwrap_or("?"),
                        sensor.read_rate.unwrap_or_default(),
                        sensor.samples.unwrap_or_default(),
                    );
                }
            }
            Err(e) => error!("[{}] sensor listing failed: {}", id, e),
        }

        let gateway_id = id.to_string();
        connection.on_data("*", move |push| {
            if log_push {
                info!("[{}] {} {:?}", gateway_id, push.topic, push.message);
            } else {
                info!("[{}] {}", gateway_id, push.topic);
            }
        })?;
    }

    // All connections run in background tasks.
    // This future never resolves.
    futures_util::future::pending::<()>().await;

    drop(listeners);
    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let cfg = Config::from_json(&data).with_context(|| format!("parsing {path}"))?;
    Ok(cfg)
}
