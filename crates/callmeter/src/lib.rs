//! Top-level facade crate for callmeter.
//!
//! Re-exports the core instrumentation types and the server library so users
//! can depend on a single crate.

pub use callmeter_core::{instrument, Instrument, OutcomeMarker, Registry};

pub mod core {
    pub use callmeter_core::*;
}

pub mod server {
    pub use callmeter_server::*;
}
