use crate::output::Mode;
use serde::{Deserialize, Serialize};

/// A change to one output, as pushed to subscribers and the AMQP exchange.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputEvent {
    pub id: u8,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
}

impl OutputEvent {
    pub fn now(id: u8, kind: EventKind) -> OutputEvent {
        OutputEvent {
            id,
            timestamp: chrono::Utc::now(),
            kind,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum EventKind {
    StatusChanged { status: bool },
    ModeChanged { mode: Mode },
    OverrideChanged { manual_override: bool },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub strategy: EventFilterStrategy,
    pub entries: Vec<EventFilterEntry>,
}

impl EventFilter {
    fn match_inner(entry: &EventFilterEntry, e: &OutputEvent) -> bool {
        match entry {
            EventFilterEntry::Any => true,
            EventFilterEntry::Output { id } => e.id == *id,
            EventFilterEntry::Kind { kind } => match kind {
                EventFilterKind::Status => matches!(e.kind, EventKind::StatusChanged { .. }),
                EventFilterKind::Mode => matches!(e.kind, EventKind::ModeChanged { .. }),
                EventFilterKind::Override => {
                    matches!(e.kind, EventKind::OverrideChanged { .. })
                }
            },
        }
    }

    pub fn matches(&self, e: &OutputEvent) -> bool {
        match &self.strategy {
            EventFilterStrategy::Any => {
                self.entries.iter().any(|entry| Self::match_inner(entry, e))
            }
            EventFilterStrategy::All => {
                self.entries.iter().all(|entry| Self::match_inner(entry, e))
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum EventFilterStrategy {
    Any,
    All,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EventFilterEntry {
    Any,
    Output { id: u8 },
    Kind { kind: EventFilterKind },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EventFilterKind {
    Status,
    Mode,
    Override,
}
