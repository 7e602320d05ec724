//! Metric registries.
//!
//! There is exactly one process-wide global registry (id 0), created lazily
//! on first use, and any number of isolated registries, each a separate
//! instance of the same type. Nothing distinguishes the two beyond which
//! handle a caller passes around.
//!
//! Families are keyed by name in a `DashMap`; the entry API makes
//! first-access registration race-free (one winner, everyone else sees it).
//! A per-registry sequence number remembers registration order for
//! deterministic exposition output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{MetricsError, Result};
use crate::exposition;
use crate::family::{CounterVec, GaugeVec, HistogramVec, MetricFamily};
use crate::metric::MetricDesc;
use crate::snapshot::FamilySnapshot;

static GLOBAL: OnceLock<Registry> = OnceLock::new();
static NEXT_ISOLATED_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryScope {
    Global,
    Isolated,
}

impl RegistryScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistryScope::Global => "global",
            RegistryScope::Isolated => "isolated",
        }
    }
}

/// Cheap, cloneable handle; clones share the same families.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    id: u64,
    scope: RegistryScope,
    families: DashMap<String, Arc<MetricFamily>>,
    seq: AtomicU64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.inner.id)
            .field("scope", &self.inner.scope)
            .field("families", &self.inner.families.len())
            .finish()
    }
}

impl Registry {
    fn with_scope(id: u64, scope: RegistryScope) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                id,
                scope,
                families: DashMap::new(),
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// The shared process-wide registry.
    pub fn global() -> Registry {
        GLOBAL
            .get_or_init(|| Registry::with_scope(0, RegistryScope::Global))
            .clone()
    }

    /// A fresh registry sharing nothing with any other.
    pub fn isolated() -> Registry {
        let id = NEXT_ISOLATED_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(registry_id = id, "isolated registry created");
        Registry::with_scope(id, RegistryScope::Isolated)
    }

    /// `create(false)` is the global handle, `create(true)` a new isolated one.
    pub fn create(isolated: bool) -> Registry {
        if isolated {
            Registry::isolated()
        } else {
            Registry::global()
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn scope(&self) -> RegistryScope {
        self.inner.scope
    }

    pub fn is_global(&self) -> bool {
        self.inner.scope == RegistryScope::Global
    }

    /// Whether both handles point at the same registry.
    pub fn same_as(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Return the family registered under `desc.name`, creating it if absent.
    ///
    /// An existing family is reused only when kind, label names and buckets
    /// all match; otherwise this fails with `SchemaConflict` and the existing
    /// family is left untouched.
    pub fn register_or_get(&self, desc: MetricDesc) -> Result<Arc<MetricFamily>> {
        let desc = desc.validated()?;

        match self.inner.families.entry(desc.name.clone()) {
            Entry::Occupied(e) => {
                let family = Arc::clone(e.get());
                drop(e);
                if let Some(reason) = family.desc().schema_mismatch(&desc) {
                    tracing::warn!(
                        registry_id = self.inner.id,
                        metric = %desc.name,
                        %reason,
                        "metric schema conflict"
                    );
                    return Err(MetricsError::SchemaConflict {
                        name: desc.name,
                        reason,
                    });
                }
                Ok(family)
            }
            Entry::Vacant(v) => {
                let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    registry_id = self.inner.id,
                    metric = %desc.name,
                    kind = desc.kind.as_str(),
                    "metric family registered"
                );
                let family = Arc::new(MetricFamily::new(desc, seq));
                v.insert(Arc::clone(&family));
                Ok(family)
            }
        }
    }

    pub fn counter_vec(&self, name: &str, help: &str, labels: &[&str]) -> Result<CounterVec> {
        self.register_or_get(MetricDesc::counter(name, help).labels(labels))
            .map(CounterVec::new)
    }

    pub fn gauge_vec(&self, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
        self.register_or_get(MetricDesc::gauge(name, help).labels(labels))
            .map(GaugeVec::new)
    }

    pub fn histogram_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
        buckets: &[f64],
    ) -> Result<HistogramVec> {
        self.register_or_get(
            MetricDesc::histogram(name, help)
                .labels(labels)
                .buckets(buckets),
        )
        .map(HistogramVec::new)
    }

    pub fn family(&self, name: &str) -> Option<Arc<MetricFamily>> {
        self.inner.families.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn family_count(&self) -> usize {
        self.inner.families.len()
    }

    /// Snapshot every family, in registration order.
    pub fn collect(&self) -> Vec<FamilySnapshot> {
        let mut families: Vec<Arc<MetricFamily>> = self
            .inner
            .families
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        families.sort_by_key(|f| f.seq());
        families.iter().map(|f| f.snapshot()).collect()
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> String {
        exposition::encode(&self.collect())
    }
}
