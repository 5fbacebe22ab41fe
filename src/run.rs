use crate::eval::evaluate_once;
use crate::event::{EventKind, OutputEvent};
use crate::output::SensorChannel;
use crate::persist;
use crate::store::Store;
use chrono::Local;
use log::{debug, error};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const TEMPERATURE_RANGE: (f64, f64) = (15.0, 35.0);
const HUMIDITY_RANGE: (f64, f64) = (20.0, 80.0);
const TEMPERATURE_STEP: f64 = 2.0;
const HUMIDITY_STEP: f64 = 5.0;

/// Fixed-rate evaluation driver. Each tick takes a sensor snapshot, runs one
/// pass, pushes change events, and nudges the state saver, so disk latency
/// never delays the next tick.
pub async fn run_evaluator(
    store: Arc<Store>,
    events: broadcast::Sender<OutputEvent>,
    save_tx: mpsc::Sender<()>,
    period: Duration,
    token: CancellationToken,
) {
    let mut timer = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("evaluator: shutting down");
                return;
            }
            _ = timer.tick() => {}
        }

        let snapshot = store.sensor_snapshot();
        let report = evaluate_once(&store, Local::now(), &snapshot);
        if report.changed.is_empty() {
            continue;
        }
        debug!("evaluator: outputs changed: {:?}", report.changed);

        for change in &report.changed {
            let _ = events.send(OutputEvent::now(
                change.id,
                EventKind::StatusChanged {
                    status: change.status,
                },
            ));
        }

        // A request already pending covers this one; the saver snapshots
        // fresh state when it gets around to it.
        let _ = save_tx.try_send(());
    }
}

/// Sole writer of the state file. One save at a time keeps concurrent
/// writers off the temp path, so a slow save can never race a later one
/// into a corrupt rename.
pub async fn run_state_saver(
    store: Arc<Store>,
    state_file: PathBuf,
    mut requests: mpsc::Receiver<()>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("state saver: shutting down");
                return;
            }
            req = requests.recv() => {
                if req.is_none() {
                    return;
                }
                if let Err(e) = persist::save(&state_file, &store.full_state()).await {
                    error!("state save failed: {:#}", e);
                }
            }
        }
    }
}

/// Bounded random walk over the sensor channels, in place of real hardware.
pub async fn run_sensor_walk(store: Arc<Store>, period: Duration, token: CancellationToken) {
    let mut timer = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("sensor walk: shutting down");
                return;
            }
            _ = timer.tick() => {}
        }

        let snapshot = store.sensor_snapshot();
        let mut rng = rand::thread_rng();
        for (channel, step, range) in [
            (SensorChannel::Temperature, TEMPERATURE_STEP, TEMPERATURE_RANGE),
            (SensorChannel::Humidity, HUMIDITY_STEP, HUMIDITY_RANGE),
        ] {
            let current = snapshot
                .get(&channel)
                .copied()
                .unwrap_or((range.0 + range.1) / 2.0);
            let next = walk_step(current, rng.gen::<f64>(), step, range);
            store.set_sensor(channel, next);
        }
    }
}

fn walk_step(current: f64, rand01: f64, step: f64, range: (f64, f64)) -> f64 {
    (current + (rand01 - 0.5) * step).clamp(range.0, range.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_step_is_bounded() {
        // Maximum upward step at the upper bound stays clamped.
        assert_eq!(walk_step(35.0, 1.0, TEMPERATURE_STEP, TEMPERATURE_RANGE), 35.0);
        assert_eq!(walk_step(15.0, 0.0, TEMPERATURE_STEP, TEMPERATURE_RANGE), 15.0);
        // Mid-range moves by at most half a step either way.
        let v = walk_step(25.0, 1.0, TEMPERATURE_STEP, TEMPERATURE_RANGE);
        assert_eq!(v, 26.0);
        let v = walk_step(50.0, 0.0, HUMIDITY_STEP, HUMIDITY_RANGE);
        assert_eq!(v, 47.5);
    }

    #[tokio::test]
    async fn saver_handles_bursts_without_corrupting_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(Store::new(0));
        store.set_status(2, true).unwrap();

        let (tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let saver = tokio::spawn(run_state_saver(
            store.clone(),
            path.clone(),
            rx,
            token.clone(),
        ));

        // A burst of requests; the bounded channel coalesces, the single
        // writer drains them one save at a time.
        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        drop(tx);
        saver.await.unwrap();

        let state = crate::persist::load(&path)
            .await
            .expect("file parses cleanly")
            .expect("file present");
        assert!(state.outputs[1].status);
    }
}
