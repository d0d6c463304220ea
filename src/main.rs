//! FIX market-data / reference-data bridge
//!
//! # Startup
//! 1. Logging, then configuration (`CONFIG_PATH`, default `config.toml`)
//! 2. Connect, spawn the writer, reader and market-data consumer
//! 3. Logon, then serve the control surface
//!
//! Any protocol fault or loss of the session ends the process with a
//! non-zero status; there is no reconnect.

use anyhow::Context;
use cts_fix_bridge::core::EventPublisher;
use cts_fix_bridge::infrastructure::{init_logging, start_server, AppState, Config, MetricsCollector};
use cts_fix_bridge::market_data::MarketDataGateway;
use cts_fix_bridge::refdata::ReferenceDataCache;
use cts_fix_bridge::session::{transport, FixSession, MessageBus, SessionError};
use cts_fix_bridge::{log_main, BridgeError};
use std::sync::Arc;
use tracing::Level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guards = init_logging().context("failed to initialize logging")?;

    let config = Config::load().context("failed to load configuration")?;
    config.validate()?;
    log_main!(
        Level::INFO,
        host = %config.session.host,
        port = config.session.port,
        tls = config.session.tls,
        "starting bridge"
    );

    // 1. Session
    let metrics = Arc::new(MetricsCollector::new());
    let bus = Arc::new(MessageBus::new(config.bus.capacity));
    let (reader, writer) = transport::connect(&config.session)
        .await
        .context("failed to connect to the exchange")?;
    let (session, outbound) =
        FixSession::new(config.session.clone(), Arc::clone(&bus), Arc::clone(&metrics));

    let writer_task = tokio::spawn(transport::run_writer(writer, outbound));
    let reader_task = tokio::spawn(Arc::clone(&session).run_reader(reader));

    // 2. Market data consumer must be on the bus before any W/X can arrive
    let events = Arc::new(EventPublisher::new(config.market_data.event_capacity));
    let gateway = Arc::new(MarketDataGateway::new(
        Arc::clone(&session),
        config.market_data.clone(),
        events,
        Arc::clone(&metrics),
    ));
    let gateway_task = tokio::spawn(Arc::clone(&gateway).run());

    session.logon().await.context("logon failed")?;
    log_main!(Level::INFO, "logged on");

    // 3. Control surface
    let refdata = Arc::new(ReferenceDataCache::new(
        Arc::clone(&session),
        &config.reference_data,
        Arc::clone(&metrics),
    ));
    let state = AppState::new(session, refdata, gateway, metrics, config.api.clone());
    let api_task = tokio::spawn(start_server(state));

    let reason: BridgeError = tokio::select! {
        joined = reader_task => match joined {
            Ok(Ok(())) => SessionError::Disconnected.into(),
            Ok(Err(e)) => e.into(),
            Err(e) => return Err(e).context("session reader panicked"),
        },
        joined = writer_task => match joined {
            Ok(Ok(())) => SessionError::Disconnected.into(),
            Ok(Err(e)) => SessionError::from(e).into(),
            Err(e) => return Err(e).context("session writer panicked"),
        },
        joined = gateway_task => match joined {
            Ok(Ok(())) => SessionError::Disconnected.into(),
            Ok(Err(e)) => e.into(),
            Err(e) => return Err(e).context("market data consumer panicked"),
        },
        joined = api_task => match joined {
            Ok(Ok(())) => std::io::Error::new(std::io::ErrorKind::Other, "API server stopped").into(),
            Ok(Err(e)) => e.into(),
            Err(e) => return Err(e).context("API server panicked"),
        },
        _ = tokio::signal::ctrl_c() => {
            log_main!(Level::INFO, "shutdown requested");
            return Ok(());
        }
    };

    log_main!(Level::ERROR, error = %reason, fatal = reason.is_fatal(), "bridge stopped");
    Err(reason.into())
}
