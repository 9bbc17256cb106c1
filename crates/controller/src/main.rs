mod actuation;
#[cfg(feature = "hardware")]
mod adc;
mod config;
mod decision;
mod gateway;
mod scheduler;
mod sensor;
#[cfg(all(feature = "sim", not(feature = "hardware")))]
mod sim;
mod telemetry;
mod valve;

use anyhow::Result;
use std::{env, time::Duration};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gateway::HttpGateway;
use scheduler::{Orchestrator, SchedulerTiming};
use sensor::{AnalogInput, SensorSampler};
use telemetry::MqttSink;
use valve::ValveBoard;

#[cfg(not(any(feature = "sim", feature = "hardware")))]
compile_error!("enable either the `sim` or the `hardware` feature");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    info!(config = %config_path, "config loaded");

    // ── Analog channels ─────────────────────────────────────────────
    #[cfg(feature = "hardware")]
    let (moisture, tds) = {
        // Both probes on one ADS1115: moisture on AIN0, TDS on AIN1.
        let addr: u16 = env::var("ADS1115_ADDR")
            .ok()
            .and_then(|s| u16::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(0x48);
        (
            adc::Ads1115Channel::new(addr, 0)?,
            adc::Ads1115Channel::new(addr, 1)?,
        )
    };

    #[cfg(all(feature = "sim", not(feature = "hardware")))]
    let (moisture, tds) = (
        sim::SimChannel::moisture(cfg.sensors.raw_dry, cfg.sensors.raw_wet),
        sim::SimChannel::tds(1.6),
    );

    run(cfg, moisture, tds).await
}

async fn run(
    cfg: config::Config,
    moisture: impl AnalogInput,
    tds: impl AnalogInput,
) -> Result<()> {
    // ── Valves (fail-safe: both closed at init) ─────────────────────
    let valves = ValveBoard::new(
        cfg.valves.water_gpio_pin,
        cfg.valves.fertilizer_gpio_pin,
        cfg.valves.active_low,
    )?;

    // ── Collaborators ───────────────────────────────────────────────
    let sampler = SensorSampler::new(moisture, tds, cfg.calibration());
    let gateway = HttpGateway::new(&cfg.service.base_url, &cfg.service.user_token);

    let (sink, eventloop) = MqttSink::new(
        &cfg.mqtt.host,
        cfg.mqtt.port,
        &cfg.mqtt.topic,
        &cfg.service.user_token,
    );
    tokio::spawn(telemetry::run_event_loop(eventloop));

    // ── Shutdown plumbing ───────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("failed to listen for shutdown signal: {e}"),
        }
    });

    // ── Control loop ────────────────────────────────────────────────
    let timing = SchedulerTiming {
        poll_interval: Duration::from_secs(cfg.timing.poll_interval_sec),
        sensor_backoff: Duration::from_secs(cfg.timing.sensor_backoff_sec),
        gateway_backoff: Duration::from_secs(cfg.timing.gateway_backoff_sec),
        water_recalc_window: Duration::from_secs(cfg.timing.water_recalc_hours * 3600),
        fertilizer_interval: Duration::from_secs(cfg.timing.fertilizer_interval_hours * 3600),
    };

    let orchestrator = Orchestrator::new(
        gateway,
        sink,
        sampler,
        valves,
        cfg.actuation(),
        timing,
        shutdown_rx,
    );

    // run() owns the valves and guarantees they are closed before it returns,
    // including on the shutdown path.
    orchestrator.run().await;

    Ok(())
}
