//! Metric families and their typed handles.
//!
//! Series are keyed by the label-value tuple, in declared label order, and
//! stored in a `DashMap` so concurrent updates on different series never
//! contend on one lock. Counter and gauge values are `f64` bit patterns in
//! an `AtomicU64`; a histogram series lives behind its own mutex so bucket
//! counts, sum and count are always read and written together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{MetricsError, Result};
use crate::metric::{MetricDesc, MetricKind};
use crate::snapshot::{FamilySnapshot, HistogramSnapshot, SampleValue, SeriesSnapshot};

type LabelKey = Vec<String>;

#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }

    fn add(&self, delta: f64) {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct HistogramState {
    /// Cumulative: `buckets[i]` counts observations `<= bounds[i]`.
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(bounds: usize) -> Self {
        Self {
            buckets: vec![0; bounds],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, bounds: &[f64], v: f64) {
        for (i, &b) in bounds.iter().enumerate() {
            if v <= b {
                self.buckets[i] += 1;
            }
        }
        self.sum += v;
        self.count += 1;
    }
}

enum Series {
    Counter(DashMap<LabelKey, AtomicF64>),
    Gauge(DashMap<LabelKey, AtomicF64>),
    Histogram(DashMap<LabelKey, Mutex<HistogramState>>),
}

/// One named metric inside one registry.
pub struct MetricFamily {
    desc: MetricDesc,
    seq: u64,
    series: Series,
}

impl std::fmt::Debug for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricFamily")
            .field("desc", &self.desc)
            .field("seq", &self.seq)
            .field("series", &self.series_count())
            .finish()
    }
}

impl MetricFamily {
    /// `desc` must already be validated.
    pub(crate) fn new(desc: MetricDesc, seq: u64) -> Self {
        let series = match desc.kind {
            MetricKind::Counter => Series::Counter(DashMap::new()),
            MetricKind::Gauge => Series::Gauge(DashMap::new()),
            MetricKind::Histogram => Series::Histogram(DashMap::new()),
        };
        Self { desc, seq, series }
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn kind(&self) -> MetricKind {
        self.desc.kind
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn series_count(&self) -> usize {
        match &self.series {
            Series::Counter(m) | Series::Gauge(m) => m.len(),
            Series::Histogram(m) => m.len(),
        }
    }

    fn key(&self, values: &[&str]) -> Result<LabelKey> {
        if values.len() != self.desc.label_names.len() {
            return Err(MetricsError::LabelCardinality {
                name: self.desc.name.clone(),
                expected: self.desc.label_names.len(),
                got: values.len(),
            });
        }
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    fn scalar_cells(&self) -> Result<&DashMap<LabelKey, AtomicF64>> {
        match &self.series {
            Series::Counter(m) | Series::Gauge(m) => Ok(m),
            Series::Histogram(_) => Err(self.kind_mismatch()),
        }
    }

    fn histogram_cells(&self) -> Result<&DashMap<LabelKey, Mutex<HistogramState>>> {
        match &self.series {
            Series::Histogram(m) => Ok(m),
            _ => Err(self.kind_mismatch()),
        }
    }

    fn kind_mismatch(&self) -> MetricsError {
        MetricsError::Internal(format!(
            "handle used against {} family {}",
            self.desc.kind.as_str(),
            self.desc.name
        ))
    }

    fn check_value(&self, v: f64) -> Result<()> {
        if v.is_nan() {
            return Err(MetricsError::InvalidValue {
                name: self.desc.name.clone(),
                value: v,
            });
        }
        Ok(())
    }

    fn scalar_add(&self, values: &[&str], delta: f64) -> Result<()> {
        self.check_value(delta)?;
        let key = self.key(values)?;
        self.scalar_cells()?.entry(key).or_default().add(delta);
        Ok(())
    }

    fn scalar_get(&self, values: &[&str]) -> Option<f64> {
        let key = self.key(values).ok()?;
        self.scalar_cells().ok()?.get(&key).map(|c| c.value().load())
    }

    fn touch(&self, values: &[&str]) -> Result<()> {
        let key = self.key(values)?;
        match &self.series {
            Series::Counter(m) | Series::Gauge(m) => {
                m.entry(key).or_default();
            }
            Series::Histogram(m) => {
                let n = self.desc.buckets.len();
                m.entry(key)
                    .or_insert_with(|| Mutex::new(HistogramState::new(n)));
            }
        }
        Ok(())
    }

    fn histogram_snapshot(&self, state: &HistogramState) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self
                .desc
                .buckets
                .iter()
                .copied()
                .zip(state.buckets.iter().copied())
                .collect(),
            sum: state.sum,
            count: state.count,
        }
    }

    /// Copy current state. Each series is read atomically; series are
    /// ordered by label values.
    pub fn snapshot(&self) -> FamilySnapshot {
        let mut series: Vec<SeriesSnapshot> = match &self.series {
            Series::Counter(m) => m
                .iter()
                .map(|r| SeriesSnapshot {
                    label_values: r.key().clone(),
                    value: SampleValue::Counter(r.value().load()),
                })
                .collect(),
            Series::Gauge(m) => m
                .iter()
                .map(|r| SeriesSnapshot {
                    label_values: r.key().clone(),
                    value: SampleValue::Gauge(r.value().load()),
                })
                .collect(),
            Series::Histogram(m) => m
                .iter()
                .map(|r| {
                    let state = r.value().lock().clone();
                    SeriesSnapshot {
                        label_values: r.key().clone(),
                        value: SampleValue::Histogram(self.histogram_snapshot(&state)),
                    }
                })
                .collect(),
        };
        series.sort_by(|a, b| a.label_values.cmp(&b.label_values));

        FamilySnapshot {
            name: self.desc.name.clone(),
            help: self.desc.help.clone(),
            kind: self.desc.kind,
            label_names: self.desc.label_names.clone(),
            series,
        }
    }
}

/// Counter family handle: monotonically non-decreasing per label set.
#[derive(Clone, Debug)]
pub struct CounterVec {
    family: Arc<MetricFamily>,
}

impl CounterVec {
    pub(crate) fn new(family: Arc<MetricFamily>) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &Arc<MetricFamily> {
        &self.family
    }

    /// Increment by 1.
    pub fn inc(&self, values: &[&str]) -> Result<()> {
        self.inc_by(values, 1.0)
    }

    /// Increment by a finite, non-negative amount.
    pub fn inc_by(&self, values: &[&str], v: f64) -> Result<()> {
        if !v.is_finite() || v < 0.0 {
            return Err(MetricsError::InvalidValue {
                name: self.family.desc.name.clone(),
                value: v,
            });
        }
        self.family.scalar_add(values, v)
    }

    /// Create the series at zero if absent.
    pub fn touch(&self, values: &[&str]) -> Result<()> {
        self.family.touch(values)
    }

    pub fn get(&self, values: &[&str]) -> Option<f64> {
        self.family.scalar_get(values)
    }
}

/// Gauge family handle: arbitrary value per label set.
#[derive(Clone, Debug)]
pub struct GaugeVec {
    family: Arc<MetricFamily>,
}

impl GaugeVec {
    pub(crate) fn new(family: Arc<MetricFamily>) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &Arc<MetricFamily> {
        &self.family
    }

    /// Increment by 1.
    pub fn inc(&self, values: &[&str]) -> Result<()> {
        self.add(values, 1.0)
    }

    /// Decrement by 1.
    pub fn dec(&self, values: &[&str]) -> Result<()> {
        self.add(values, -1.0)
    }

    /// Add an arbitrary signed delta.
    pub fn add(&self, values: &[&str], delta: f64) -> Result<()> {
        self.family.scalar_add(values, delta)
    }

    pub fn set(&self, values: &[&str], v: f64) -> Result<()> {
        self.family.check_value(v)?;
        let key = self.family.key(values)?;
        self.family.scalar_cells()?.entry(key).or_default().store(v);
        Ok(())
    }

    pub fn touch(&self, values: &[&str]) -> Result<()> {
        self.family.touch(values)
    }

    pub fn get(&self, values: &[&str]) -> Option<f64> {
        self.family.scalar_get(values)
    }
}

/// Histogram family handle with the family's fixed bucket bounds.
#[derive(Clone, Debug)]
pub struct HistogramVec {
    family: Arc<MetricFamily>,
}

impl HistogramVec {
    pub(crate) fn new(family: Arc<MetricFamily>) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &Arc<MetricFamily> {
        &self.family
    }

    pub fn observe(&self, values: &[&str], v: f64) -> Result<()> {
        self.family.check_value(v)?;
        let key = self.family.key(values)?;
        let bounds = &self.family.desc.buckets;
        self.family
            .histogram_cells()?
            .entry(key)
            .or_insert_with(|| Mutex::new(HistogramState::new(bounds.len())))
            .lock()
            .observe(bounds, v);
        Ok(())
    }

    /// Observe a duration in seconds.
    pub fn observe_duration(&self, values: &[&str], d: Duration) -> Result<()> {
        self.observe(values, d.as_secs_f64())
    }

    pub fn touch(&self, values: &[&str]) -> Result<()> {
        self.family.touch(values)
    }

    pub fn get(&self, values: &[&str]) -> Option<HistogramSnapshot> {
        let key = self.family.key(values).ok()?;
        let cells = self.family.histogram_cells().ok()?;
        let state = cells.get(&key)?.value().lock().clone();
        Some(self.family.histogram_snapshot(&state))
    }
}
