//! callmeter core: metric registries, families, call instrumentation and
//! the text exposition format.
//!
//! This crate carries no runtime or transport dependencies. Synchronous and
//! asynchronous callables are wrapped through the same `Instrument` factory;
//! registries are either the process-wide global one or isolated instances,
//! and the two never share state.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Fallible paths surface as `MetricsError`/`Result`; metric updates made on
//! behalf of an instrumented call are logged and dropped on failure, never
//! propagated into the caller's result.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod exposition;
pub mod family;
pub mod instrument;
pub mod metric;
pub mod outcome;
pub mod registry;
pub mod snapshot;

/// Shared result type.
pub use error::{ErrorCode, MetricsError, Result};
pub use family::{CounterVec, GaugeVec, HistogramVec, MetricFamily};
pub use instrument::{
    instrument, ClassifyOutcome, ExecutionModel, Instrument, Instrumented, InstrumentedAsync,
    Outcome, Probe,
};
pub use metric::{MetricDesc, MetricKind};
pub use outcome::OutcomeMarker;
pub use registry::{Registry, RegistryScope};
pub use snapshot::{FamilySnapshot, HistogramSnapshot, SampleValue, SeriesSnapshot};
