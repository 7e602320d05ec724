//! Shared application state for the metrics server.
//!
//! One registry per state: the process-wide global one or a fresh isolated
//! instance, picked at construction and never swapped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use callmeter_core::error::Result;
use callmeter_core::instrument::DEFAULT_DURATION_BUCKETS;
use callmeter_core::{instrument, Instrument, Registry};

use crate::config::ServerConfig;
use crate::obs::HttpMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Registry,
    instance_id: u32,
    duration_buckets: Vec<f64>,
    http: Option<HttpMetrics>,
    draining: AtomicBool,
}

impl AppState {
    /// State over an existing registry, default buckets, no HTTP metrics.
    pub fn new(registry: Registry, instance_id: u32) -> Self {
        Self::assemble(registry, instance_id, DEFAULT_DURATION_BUCKETS.to_vec(), None)
    }

    /// Build state from a validated config. HTTP metric families are
    /// registered here, so a conflicting schema fails startup.
    pub fn from_config(cfg: &ServerConfig, instance_id: u32) -> Result<Self> {
        let registry = cfg.metrics.registry.build();
        let http = if cfg.http.enabled {
            Some(HttpMetrics::register(&registry, &cfg.http.duration_buckets_ms)?)
        } else {
            None
        };

        tracing::info!(
            instance_id,
            registry_id = registry.id(),
            registry_scope = registry.scope().as_str(),
            http_metrics = cfg.http.enabled,
            "app state ready"
        );

        Ok(Self::assemble(
            registry,
            instance_id,
            cfg.metrics.duration_buckets.clone(),
            http,
        ))
    }

    fn assemble(
        registry: Registry,
        instance_id: u32,
        duration_buckets: Vec<f64>,
        http: Option<HttpMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                instance_id,
                duration_buckets,
                http,
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn instance_id(&self) -> u32 {
        self.inner.instance_id
    }

    pub fn http_metrics(&self) -> Option<&HttpMetrics> {
        self.inner.http.as_ref()
    }

    /// Wrapper factory bound to this state's registry and buckets.
    pub fn instrument(&self) -> Instrument {
        instrument()
            .registry(&self.inner.registry)
            .buckets(&self.inner.duration_buckets)
    }

    /// Mark draining state.
    pub fn set_draining(&self) {
        self.inner.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Relaxed)
    }
}
