use crate::output::{Input, Output, SensorChannel};
use crate::store::FullState;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

/// On-disk shape of the daemon state. Outputs are stored as full records;
/// input statuses are packed into a bitmask (bit i = status of input i+1)
/// with a parallel name list.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PersistedState {
    pub outputs: Vec<Output>,
    pub input_bits: u8,
    pub input_names: Vec<String>,
    pub sensors: HashMap<SensorChannel, f64>,
}

impl PersistedState {
    pub fn pack(state: &FullState) -> PersistedState {
        let mut input_bits = 0u8;
        for input in &state.inputs {
            // The mask holds 8 inputs; ids beyond that have nowhere to go.
            if input.status && (1..=8).contains(&input.id) {
                input_bits |= 1 << (input.id - 1);
            }
        }
        PersistedState {
            outputs: state.outputs.clone(),
            input_bits,
            input_names: state.inputs.iter().map(|i| i.name.clone()).collect(),
            sensors: state.sensors.clone(),
        }
    }

    pub fn unpack(self) -> FullState {
        let inputs = self
            .input_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Input {
                id: i as u8 + 1,
                name,
                // Guard the shift: a hand-edited file may list more names
                // than the mask has bits.
                status: i < 8 && self.input_bits & (1 << i) != 0,
            })
            .collect();
        FullState {
            outputs: self.outputs,
            inputs,
            sensors: self.sensors,
        }
    }
}

/// Loads the state file. A missing file is not an error; the caller starts
/// from the default state.
pub async fn load(path: &Path) -> Result<Option<FullState>> {
    let buf = match tokio::fs::read(path).await {
        Ok(buf) => buf,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(format!("unable to read state file {}", path.display())),
    };
    let persisted: PersistedState =
        serde_json::from_slice(&buf).context("unable to decode state file")?;
    Ok(Some(persisted.unpack()))
}

/// Writes the state file atomically (temp file + rename). Best-effort: the
/// in-memory state stays authoritative whether or not this succeeds.
pub async fn save(path: &Path, state: &FullState) -> Result<()> {
    let buf = serde_json::to_vec_pretty(&PersistedState::pack(state))
        .context("unable to encode state")?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &buf)
        .await
        .context(format!("unable to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .context("unable to move state file into place")?;
    debug!("saved {} bytes to {}", buf.len(), path.display());
    Ok(())
}
