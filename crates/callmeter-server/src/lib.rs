//! callmeter server library entry.
//!
//! Wires a registry into an axum service exposing `/metrics` and the
//! operational endpoints, optional per-request HTTP metrics, and the
//! multi-instance isolation harness. Consumed by the two binaries
//! (`callmeter-server`, `callmeter-harness`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod harness;
pub mod obs;
pub mod ops;
pub mod router;
