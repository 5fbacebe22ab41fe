use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Daemon configuration. Every field has a default, so an empty or missing
/// config file yields a working single-machine setup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// AMQP broker address; event publishing is disabled when unset.
    #[serde(default)]
    pub amqp_addr: Option<String>,
    #[serde(default = "default_eval_interval")]
    pub eval_interval_secs: u64,
    #[serde(default = "default_sensor_interval")]
    pub sensor_interval_secs: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3179".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("switchboard-state.json")
}

fn default_eval_interval() -> u64 {
    1
}

fn default_sensor_interval() -> u64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: default_listen_addr(),
            state_file: default_state_file(),
            amqp_addr: None,
            eval_interval_secs: default_eval_interval(),
            sensor_interval_secs: default_sensor_interval(),
        }
    }
}

impl Config {
    /// Reads the config file; a missing file falls back to defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let buf = match std::fs::read(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(e).context(format!("unable to read config {}", path.display()))
            }
        };
        serde_json::from_slice(&buf).context("unable to decode config")
    }
}
