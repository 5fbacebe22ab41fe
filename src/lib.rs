//! Output-control daemon core: a store of six relay-style outputs driven by
//! manual, periodic, scheduled, or sensor-threshold logic, plus six binary
//! inputs and live ambient sensor readings.
//!
//! The evaluator ([`eval::evaluate_once`]) recomputes every non-overridden
//! output once per tick; everything around it (TCP API, persistence, AMQP
//! fan-out) only reads or merges store state.

pub mod amqp;
pub mod api;
pub mod config;
pub mod eval;
pub mod event;
pub mod output;
pub mod persist;
pub mod run;
pub mod store;
pub mod tcp;
