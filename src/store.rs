use crate::output::{
    Input, InputUpdate, Mode, Output, OutputUpdate, SensorChannel, MAX_PROGRAMS, NUM_INPUTS,
    NUM_OUTPUTS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no such channel: {id}")]
    NotFound { id: u8 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Authoritative in-memory state: outputs, inputs, and the current sensor
/// readings, behind one coarse lock. Updates are atomic at the record level;
/// a reader sees either the fully-old or fully-new record.
pub struct Store {
    inner: Mutex<FullState>,
}

/// Everything the store holds, cloned out for persistence and the status
/// endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FullState {
    pub outputs: Vec<Output>,
    pub inputs: Vec<Input>,
    pub sensors: HashMap<SensorChannel, f64>,
}

impl FullState {
    pub fn initial(now_epoch: i64) -> FullState {
        FullState {
            outputs: (1..=NUM_OUTPUTS).map(|id| Output::new(id, now_epoch)).collect(),
            inputs: (1..=NUM_INPUTS).map(Input::new).collect(),
            sensors: HashMap::from([
                (SensorChannel::Temperature, 22.0),
                (SensorChannel::Humidity, 45.0),
            ]),
        }
    }
}

impl Store {
    pub fn new(now_epoch: i64) -> Store {
        Store::from_state(FullState::initial(now_epoch))
    }

    pub fn from_state(state: FullState) -> Store {
        Store {
            inner: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FullState> {
        // Lock poisoning only happens if a holder panicked; the state itself
        // is still record-consistent, so we keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, id: u8) -> Result<Output, StoreError> {
        let state = self.lock();
        state
            .outputs
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    /// All outputs, in id order.
    pub fn list(&self) -> Vec<Output> {
        self.lock().outputs.clone()
    }

    /// Merges the given fields into the output record. A mode write (even one
    /// that keeps the current mode) resets `last_toggle` to `now_epoch` so
    /// mode-relative timers restart cleanly. Validation failures leave the
    /// record untouched.
    pub fn update(&self, id: u8, update: OutputUpdate, now_epoch: i64) -> Result<Output, StoreError> {
        if let Some(Mode::Scheduled { programs }) = &update.mode {
            validate_programs(programs)?;
        }

        let mut state = self.lock();
        let output = state
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound { id })?;

        if let Some(name) = update.name {
            output.name = name;
        }
        if let Some(status) = update.status {
            output.status = status;
        }
        if let Some(manual_override) = update.manual_override {
            output.manual_override = manual_override;
        }
        if let Some(mode) = update.mode {
            output.mode = mode;
            output.last_toggle = now_epoch;
        }

        Ok(output.clone())
    }

    /// Evaluator-internal status write; does not reset `last_toggle`.
    pub fn set_status(&self, id: u8, status: bool) -> Result<(), StoreError> {
        let mut state = self.lock();
        let output = state
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound { id })?;
        output.status = status;
        Ok(())
    }

    /// Manual flip: takes the output out of automatic control entirely.
    pub fn toggle(&self, id: u8) -> Result<Output, StoreError> {
        let mut state = self.lock();
        let output = state
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound { id })?;
        output.status = !output.status;
        output.manual_override = true;
        output.mode = Mode::Manual;
        Ok(output.clone())
    }

    pub fn toggle_override(&self, id: u8) -> Result<Output, StoreError> {
        let mut state = self.lock();
        let output = state
            .outputs
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StoreError::NotFound { id })?;
        output.manual_override = !output.manual_override;
        Ok(output.clone())
    }

    pub fn get_input(&self, id: u8) -> Result<Input, StoreError> {
        let state = self.lock();
        state
            .inputs
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    pub fn list_inputs(&self) -> Vec<Input> {
        self.lock().inputs.clone()
    }

    pub fn update_input(&self, id: u8, update: InputUpdate) -> Result<Input, StoreError> {
        let mut state = self.lock();
        let input = state
            .inputs
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::NotFound { id })?;
        if let Some(name) = update.name {
            input.name = name;
        }
        if let Some(status) = update.status {
            input.status = status;
        }
        Ok(input.clone())
    }

    /// Consistent copy of the sensor map. The sole writer is the sensor
    /// source; replacing values under the store lock keeps reads untorn.
    pub fn sensor_snapshot(&self) -> HashMap<SensorChannel, f64> {
        self.lock().sensors.clone()
    }

    pub fn set_sensor(&self, channel: SensorChannel, value: f64) {
        self.lock().sensors.insert(channel, value);
    }

    pub fn full_state(&self) -> FullState {
        self.lock().clone()
    }

    /// Runs `f` with the output slice under the store lock. Used by the
    /// evaluator so a whole pass is one critical section.
    pub(crate) fn with_outputs_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut [Output]) -> R,
    {
        let mut state = self.lock();
        f(&mut state.outputs)
    }
}

fn validate_programs(programs: &[crate::output::Program]) -> Result<(), StoreError> {
    if programs.len() > MAX_PROGRAMS {
        return Err(StoreError::InvalidConfig(format!(
            "at most {} programs allowed, got {}",
            MAX_PROGRAMS,
            programs.len()
        )));
    }
    for p in programs {
        if p.number < 1 || p.number as usize > MAX_PROGRAMS {
            return Err(StoreError::InvalidConfig(format!(
                "program number {} outside 1..={}",
                p.number, MAX_PROGRAMS
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{PeriodicConfig, Program};
    use chrono::NaiveTime;

    fn program(number: u8, on: (u32, u32), off: (u32, u32)) -> Program {
        Program {
            number,
            on: NaiveTime::from_hms_opt(on.0, on.1, 0).unwrap(),
            off: NaiveTime::from_hms_opt(off.0, off.1, 0).unwrap(),
        }
    }

    #[test]
    fn unknown_id_is_not_found_and_leaves_state_alone() {
        let store = Store::new(1000);
        let before = store.list();
        let res = store.update(
            999,
            OutputUpdate {
                name: Some("x".into()),
                ..Default::default()
            },
            2000,
        );
        assert_eq!(res.unwrap_err(), StoreError::NotFound { id: 999 });
        assert_eq!(store.list(), before);
    }

    #[test]
    fn absent_fields_are_no_ops() {
        let store = Store::new(1000);
        store
            .update(
                1,
                OutputUpdate {
                    name: Some("Pump".into()),
                    ..Default::default()
                },
                2000,
            )
            .unwrap();
        let o = store.get(1).unwrap();
        assert_eq!(o.name, "Pump");
        assert_eq!(o.mode, Mode::Manual);
        assert!(!o.status);
        // Name-only update must not touch the phase anchor.
        assert_eq!(o.last_toggle, 1000);
    }

    #[test]
    fn mode_write_resets_last_toggle_even_for_same_mode() {
        let store = Store::new(1000);
        store
            .update(
                2,
                OutputUpdate {
                    mode: Some(Mode::Periodic(PeriodicConfig::default())),
                    ..Default::default()
                },
                5000,
            )
            .unwrap();
        assert_eq!(store.get(2).unwrap().last_toggle, 5000);

        // Same mode again, later: anchor moves again.
        store
            .update(
                2,
                OutputUpdate {
                    mode: Some(Mode::Periodic(PeriodicConfig::default())),
                    ..Default::default()
                },
                9000,
            )
            .unwrap();
        assert_eq!(store.get(2).unwrap().last_toggle, 9000);
    }

    #[test]
    fn set_status_does_not_touch_last_toggle() {
        let store = Store::new(1000);
        store.set_status(3, true).unwrap();
        let o = store.get(3).unwrap();
        assert!(o.status);
        assert_eq!(o.last_toggle, 1000);
    }

    #[test]
    fn invalid_schedule_is_rejected_without_applying_anything() {
        let store = Store::new(1000);
        let programs = vec![program(0, (8, 0), (18, 0))];
        let res = store.update(
            1,
            OutputUpdate {
                name: Some("should not stick".into()),
                mode: Some(Mode::Scheduled { programs }),
                ..Default::default()
            },
            2000,
        );
        assert!(matches!(res, Err(StoreError::InvalidConfig(_))));
        let o = store.get(1).unwrap();
        assert_eq!(o.name, "Output 1");
        assert_eq!(o.mode, Mode::Manual);
        assert_eq!(o.last_toggle, 1000);
    }

    #[test]
    fn too_many_programs_are_rejected() {
        let store = Store::new(0);
        let programs: Vec<_> = (0..21).map(|_| program(1, (8, 0), (18, 0))).collect();
        let res = store.update(
            1,
            OutputUpdate {
                mode: Some(Mode::Scheduled { programs }),
                ..Default::default()
            },
            0,
        );
        assert!(matches!(res, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn toggle_forces_manual_mode_with_override() {
        let store = Store::new(0);
        store
            .update(
                4,
                OutputUpdate {
                    mode: Some(Mode::Periodic(PeriodicConfig::default())),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        let o = store.toggle(4).unwrap();
        assert!(o.status);
        assert!(o.manual_override);
        assert_eq!(o.mode, Mode::Manual);
    }

    #[test]
    fn override_toggle_flips_flag_only() {
        let store = Store::new(0);
        let o = store.toggle_override(5).unwrap();
        assert!(o.manual_override);
        assert_eq!(o.mode, Mode::Manual);
        let o = store.toggle_override(5).unwrap();
        assert!(!o.manual_override);
    }

    #[test]
    fn input_updates_merge_fields() {
        let store = Store::new(0);
        let i = store
            .update_input(
                6,
                InputUpdate {
                    name: Some("Door contact".into()),
                    status: Some(true),
                },
            )
            .unwrap();
        assert_eq!(i.name, "Door contact");
        assert!(i.status);
        assert_eq!(
            store.update_input(7, InputUpdate::default()).unwrap_err(),
            StoreError::NotFound { id: 7 }
        );
    }

    #[test]
    fn sensor_map_is_replaced_per_channel() {
        let store = Store::new(0);
        store.set_sensor(SensorChannel::Temperature, 30.5);
        let snap = store.sensor_snapshot();
        assert_eq!(snap[&SensorChannel::Temperature], 30.5);
        assert_eq!(snap[&SensorChannel::Humidity], 45.0);
    }
}
