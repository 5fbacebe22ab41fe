use crate::output::{Mode, PeriodicConfig, Program, SensorAction, SensorChannel, SensorConfig};
use crate::store::Store;
use chrono::{DateTime, Local, NaiveTime};
use log::warn;
use std::collections::HashMap;
use thiserror::Error;

/// Configuration problem scoped to a single output. The output is skipped
/// for the pass and its status held; other outputs are unaffected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("periodic cycle length is zero")]
    ZeroCycle,
    #[error("sensor channel {0} missing from snapshot")]
    MissingChannel(SensorChannel),
}

/// Outcome of one evaluation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EvalReport {
    /// Outputs whose status flipped this pass, in id order, with the status
    /// the pass wrote. Consumers report from this, not from a later store
    /// read, so a concurrent write cannot misattribute the transition.
    pub changed: Vec<Change>,
    /// Outputs skipped due to a configuration error.
    pub errors: Vec<(u8, ConfigError)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub id: u8,
    pub status: bool,
}

/// One evaluation pass over all outputs.
///
/// Runs as a single critical section on the store, so change detection is
/// against the status each output had at the start of this pass. Outputs
/// under manual override and outputs in manual mode are never touched.
pub fn evaluate_once(
    store: &Store,
    now: DateTime<Local>,
    snapshot: &HashMap<SensorChannel, f64>,
) -> EvalReport {
    let now_epoch = now.timestamp();
    let now_time = now.time();

    let report = store.with_outputs_mut(|outputs| {
        let mut report = EvalReport::default();
        for output in outputs.iter_mut() {
            if output.manual_override {
                continue;
            }
            let desired = match &output.mode {
                Mode::Manual => continue,
                Mode::Periodic(cfg) => periodic_status(cfg, now_epoch - output.last_toggle),
                Mode::Scheduled { programs } => Ok(scheduled_status(programs, now_time)),
                Mode::Sensor(cfg) => sensor_status(cfg, snapshot),
            };
            match desired {
                Ok(desired) => {
                    if desired != output.status {
                        output.status = desired;
                        report.changed.push(Change {
                            id: output.id,
                            status: desired,
                        });
                    }
                }
                Err(e) => report.errors.push((output.id, e)),
            }
        }
        report
    });

    for (id, e) in &report.errors {
        warn!("output {}: skipped this pass: {}", id, e);
    }
    report
}

/// Square wave anchored at the phase reference point: ON while the position
/// within the cycle is inside the ON window. `rem_euclid` keeps the phase
/// non-negative even if the anchor lies in the future.
fn periodic_status(cfg: &PeriodicConfig, elapsed: i64) -> Result<bool, ConfigError> {
    let cycle = cfg.on_duration as i64 + cfg.off_duration as i64;
    if cycle == 0 {
        return Err(ConfigError::ZeroCycle);
    }
    Ok(elapsed.rem_euclid(cycle) < cfg.on_duration as i64)
}

/// ON iff any program window covers `now` (half-open: `on <= now < off`).
/// A window with `off <= on` covers nothing.
fn scheduled_status(programs: &[Program], now: NaiveTime) -> bool {
    programs.iter().any(|p| p.on <= now && now < p.off)
}

fn sensor_status(
    cfg: &SensorConfig,
    snapshot: &HashMap<SensorChannel, f64>,
) -> Result<bool, ConfigError> {
    let value = snapshot
        .get(&cfg.channel)
        .copied()
        .ok_or(ConfigError::MissingChannel(cfg.channel))?;
    let below = value < cfg.threshold;
    Ok(match cfg.action {
        SensorAction::On => below,
        SensorAction::Off => !below,
    })
}
