//! Immutable point-in-time copies of family state, produced by `collect()`.

use crate::metric::MetricKind;

#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// Ordered by label values.
    pub series: Vec<SeriesSnapshot>,
}

impl FamilySnapshot {
    /// Find the series for an exact label-value tuple.
    pub fn series(&self, label_values: &[&str]) -> Option<&SeriesSnapshot> {
        self.series.iter().find(|s| {
            s.label_values.len() == label_values.len()
                && s.label_values.iter().zip(label_values).all(|(a, b)| a == b)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub label_values: Vec<String>,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

impl SampleValue {
    /// Scalar value for counters and gauges.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Counter(v) | SampleValue::Gauge(v) => Some(*v),
            SampleValue::Histogram(_) => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&HistogramSnapshot> {
        match self {
            SampleValue::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper_bound, cumulative_count)`, last bound is `+Inf`.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}
