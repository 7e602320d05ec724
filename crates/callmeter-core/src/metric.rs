//! Metric descriptors: kind, name, help, label schema and bucket bounds.
//!
//! A descriptor is validated once, when a family is registered. The schema
//! part of it (kind + ordered label names + buckets) decides whether a
//! second registration under the same name is a reuse or a conflict.

use crate::error::{MetricsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Name used on the exposition `# TYPE` line.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    /// Upper bounds, ascending, last one `+Inf` after validation. Empty for
    /// counters and gauges.
    pub buckets: Vec<f64>,
}

impl MetricDesc {
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Counter)
    }

    pub fn gauge(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Gauge)
    }

    pub fn histogram(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name, help, MetricKind::Histogram)
    }

    fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            label_names: Vec::new(),
            buckets: Vec::new(),
        }
    }

    pub fn labels(mut self, names: &[&str]) -> Self {
        self.label_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn buckets(mut self, bounds: &[f64]) -> Self {
        self.buckets = bounds.to_vec();
        self
    }

    /// Check names and normalize histogram buckets (`+Inf` appended).
    pub(crate) fn validated(mut self) -> Result<Self> {
        if !valid_metric_name(&self.name) {
            return Err(MetricsError::InvalidName(self.name));
        }

        for (i, label) in self.label_names.iter().enumerate() {
            let reserved = label.starts_with("__")
                || (self.kind == MetricKind::Histogram && label == "le");
            if !valid_label_name(label) || reserved || self.label_names[..i].contains(label) {
                return Err(MetricsError::InvalidLabelName {
                    name: self.name.clone(),
                    label: label.clone(),
                });
            }
        }

        match self.kind {
            MetricKind::Histogram => {
                self.buckets = normalize_buckets(&self.name, &self.buckets)?;
            }
            MetricKind::Counter | MetricKind::Gauge => self.buckets.clear(),
        }
        Ok(self)
    }

    /// Why `requested` is not the same schema as `self`, if it isn't.
    /// Help text is deliberately ignored.
    pub(crate) fn schema_mismatch(&self, requested: &MetricDesc) -> Option<String> {
        if self.kind != requested.kind {
            return Some(format!(
                "registered as {}, requested as {}",
                self.kind.as_str(),
                requested.kind.as_str()
            ));
        }
        if self.label_names != requested.label_names {
            return Some(format!(
                "registered labels [{}], requested [{}]",
                self.label_names.join(","),
                requested.label_names.join(",")
            ));
        }
        if self.buckets != requested.buckets {
            return Some("histogram bucket boundaries differ".into());
        }
        None
    }
}

fn valid_metric_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn valid_label_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_buckets(name: &str, bounds: &[f64]) -> Result<Vec<f64>> {
    let invalid = |reason: &str| MetricsError::InvalidBuckets {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if bounds.is_empty() {
        return Err(invalid("at least one boundary is required"));
    }

    let last = bounds.len() - 1;
    let mut out: Vec<f64> = Vec::with_capacity(bounds.len() + 1);
    for (i, &b) in bounds.iter().enumerate() {
        if b.is_nan() {
            return Err(invalid("NaN boundary"));
        }
        if b.is_infinite() && !(b > 0.0 && i == last) {
            return Err(invalid("only the last boundary may be +Inf"));
        }
        if let Some(&prev) = out.last() {
            if b <= prev {
                return Err(invalid("boundaries must be strictly ascending"));
            }
        }
        out.push(b);
    }

    if out.last() != Some(&f64::INFINITY) {
        out.push(f64::INFINITY);
    }
    Ok(out)
}
