use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Number of output channels, fixed at startup.
pub const NUM_OUTPUTS: u8 = 6;
/// Number of binary input channels, fixed at startup.
pub const NUM_INPUTS: u8 = 6;
/// Upper bound on scheduled programs per output.
pub const MAX_PROGRAMS: usize = 20;

/// One controllable boolean-state channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Output {
    pub id: u8,
    pub name: String,
    pub status: bool,
    pub manual_override: bool,
    pub mode: Mode,
    /// Seconds since epoch; phase anchor for periodic mode. Reset on every
    /// mode write, including writes that keep the same mode.
    pub last_toggle: i64,
}

impl Output {
    pub fn new(id: u8, now_epoch: i64) -> Output {
        Output {
            id,
            name: format!("Output {}", id),
            status: false,
            manual_override: false,
            mode: Mode::Manual,
            last_toggle: now_epoch,
        }
    }
}

/// Control mode of an output, carrying the configuration for exactly that
/// mode. Switching modes supplies the new payload, so there is no inactive
/// config block to go stale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mode {
    Manual,
    Periodic(PeriodicConfig),
    Scheduled { programs: Vec<Program> },
    Sensor(SensorConfig),
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Periodic(_) => "periodic",
            Mode::Scheduled { .. } => "scheduled",
            Mode::Sensor(_) => "sensor",
        }
    }
}

/// ON/OFF duty cycle, both durations in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicConfig {
    pub on_duration: u32,
    pub off_duration: u32,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        PeriodicConfig {
            on_duration: 60,
            off_duration: 60,
        }
    }
}

/// One time-of-day window. The output is ON while `on <= now < off`, at
/// minute resolution. A program with `off <= on` never matches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Program {
    pub number: u8,
    #[serde(with = "hhmm")]
    pub on: NaiveTime,
    #[serde(with = "hhmm")]
    pub off: NaiveTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SensorConfig {
    pub channel: SensorChannel,
    pub threshold: f64,
    pub action: SensorAction,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            channel: SensorChannel::Temperature,
            threshold: 25.0,
            action: SensorAction::On,
        }
    }
}

/// Ambient measurement channels the sensor source reports.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SensorChannel {
    Temperature,
    Humidity,
}

impl std::fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorChannel::Temperature => write!(f, "temperature"),
            SensorChannel::Humidity => write!(f, "humidity"),
        }
    }
}

/// What to do when the measured value is below the threshold. `On` means the
/// output goes ON below threshold; `Off` inverts this.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensorAction {
    On,
    Off,
}

/// One binary contact channel. Status is externally driven, never computed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub id: u8,
    pub name: String,
    pub status: bool,
}

impl Input {
    pub fn new(id: u8) -> Input {
        Input {
            id,
            name: format!("Input {}", id),
            status: false,
        }
    }
}

/// Field-wise update of an output. An absent field leaves that field
/// untouched; it is never an implicit clear.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OutputUpdate {
    pub name: Option<String>,
    pub status: Option<bool>,
    pub manual_override: Option<bool>,
    pub mode: Option<Mode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct InputUpdate {
    pub name: Option<String>,
    pub status: Option<bool>,
}

/// "HH:MM" (de)serialization for schedule times. Parse failures surface at
/// write time, so the evaluator only ever sees well-formed schedules.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(t: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&t.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}
