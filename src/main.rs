use anyhow::{Context, Result};
use chrono::Local;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::Config;
use switchboard::store::{FullState, Store};
use switchboard::{amqp, persist, run, tcp};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("switchboard.json"));
    let config = Config::load(&config_path)?;
    info!("config: {:?}", config);

    let state = match persist::load(&config.state_file).await {
        Ok(Some(state)) => {
            info!("restored state from {}", config.state_file.display());
            state
        }
        Ok(None) => {
            info!("no state file, starting with defaults");
            FullState::initial(Local::now().timestamp())
        }
        Err(e) => {
            warn!("unable to load state, starting with defaults: {:#}", e);
            FullState::initial(Local::now().timestamp())
        }
    };
    let store = Arc::new(Store::from_state(state));

    let (events, _) = broadcast::channel(64);
    let (save_tx, save_rx) = mpsc::channel(1);
    let token = CancellationToken::new();

    let saver = tokio::spawn(run::run_state_saver(
        store.clone(),
        config.state_file.clone(),
        save_rx,
        token.clone(),
    ));
    let evaluator = tokio::spawn(run::run_evaluator(
        store.clone(),
        events.clone(),
        save_tx,
        Duration::from_secs(config.eval_interval_secs),
        token.clone(),
    ));
    let sensor_walk = tokio::spawn(run::run_sensor_walk(
        store.clone(),
        Duration::from_secs(config.sensor_interval_secs),
        token.clone(),
    ));

    if let Some(addr) = &config.amqp_addr {
        let publisher = amqp::EventPublisher::connect(addr)
            .await
            .context("unable to set up AMQP publisher")?;
        tokio::spawn(amqp::run_publisher(
            publisher,
            events.subscribe(),
            token.clone(),
        ));
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("unable to bind {}", config.listen_addr))?;
    info!("listening on {}", config.listen_addr);
    let server = tokio::spawn(tcp::serve(
        listener,
        store.clone(),
        events.clone(),
        token.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("shutting down");
    token.cancel();

    let _ = evaluator.await;
    let _ = sensor_walk.await;
    // The saver must be down before the final save below; two writers on the
    // same temp path could race the rename.
    let _ = saver.await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("server error: {:#}", e),
        Err(e) => error!("server task failed: {}", e),
    }

    // One last durable copy; in-memory state was authoritative until now.
    if let Err(e) = persist::save(&config.state_file, &store.full_state()).await {
        error!("final state save failed: {:#}", e);
    }

    Ok(())
}
