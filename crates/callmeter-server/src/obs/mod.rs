//! Observability for the server itself.

pub mod http;

pub use http::{track_requests, HttpMetrics};
