//! Probe scheduling, incident tracking and telemetry storage for a
//! monitoring hub.
//!
//! Probe results flow into the [`incidents::IncidentEngine`], and both the
//! results and the incidents they produce are persisted through a
//! [`storage::StorageBackend`]. The [`actors`] module wires these pieces
//! together as tokio tasks.

pub mod actors;
pub mod config;
pub mod convert;
pub mod incidents;
pub mod probes;
pub mod storage;
pub mod util;
pub mod wire;
