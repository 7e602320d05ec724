//! Prometheus text exposition format (version 0.0.4).
//!
//! `encode` is a pure projection of `collect()` output. `parse_samples`
//! reads the data lines back, which is what scrape-side verification needs;
//! it ignores `# HELP` / `# TYPE` lines and timestamps.

use std::fmt::Write;

use crate::error::{MetricsError, Result};
use crate::snapshot::{FamilySnapshot, SampleValue};

/// Content type for scrape responses.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf".into() } else { "-Inf".into() }
    } else {
        format!("{v}")
    }
}

fn label_str(names: &[String], values: &[String], le: Option<f64>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{}\"", format_value(le)));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

/// Render families in the order given.
pub fn encode(families: &[FamilySnapshot]) -> String {
    let mut out = String::new();
    for fam in families {
        let name = &fam.name;
        let _ = writeln!(out, "# HELP {} {}", name, escape_help(&fam.help));
        let _ = writeln!(out, "# TYPE {} {}", name, fam.kind.as_str());

        for s in &fam.series {
            let labels = label_str(&fam.label_names, &s.label_values, None);
            match &s.value {
                SampleValue::Counter(v) | SampleValue::Gauge(v) => {
                    let _ = writeln!(out, "{}{} {}", name, labels, format_value(*v));
                }
                SampleValue::Histogram(h) => {
                    for &(le, count) in &h.buckets {
                        let bucket_labels = label_str(&fam.label_names, &s.label_values, Some(le));
                        let _ = writeln!(out, "{}_bucket{} {}", name, bucket_labels, count);
                    }
                    let _ = writeln!(out, "{}_sum{} {}", name, labels, format_value(h.sum));
                    let _ = writeln!(out, "{}_count{} {}", name, labels, h.count);
                }
            }
        }
    }
    out
}

/// One parsed data line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Name matches and every given label is present with the given value.
    pub fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name && labels.iter().all(|(k, v)| self.label(k) == Some(*v))
    }
}

/// Value of the first sample matching `name` and `labels`.
pub fn find_value(samples: &[Sample], name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    samples
        .iter()
        .find(|s| s.matches(name, labels))
        .map(|s| s.value)
}

pub fn parse_samples(text: &str) -> Result<Vec<Sample>> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |reason: &str| MetricsError::MalformedExposition {
            line: idx + 1,
            reason: reason.to_string(),
        };
        out.push(parse_line(line).map_err(malformed)?);
    }
    Ok(out)
}

fn parse_line(line: &str) -> std::result::Result<Sample, &'static str> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or("missing value")?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("missing metric name");
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let (parsed, remaining) = parse_labels(after_brace)?;
        labels = parsed;
        rest = remaining;
    }

    let value_token = rest.split_whitespace().next().ok_or("missing value")?;
    let value = parse_value(value_token).ok_or("invalid value")?;

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse `k="v",...}`; returns the pairs and the text after `}`.
fn parse_labels(s: &str) -> std::result::Result<(Vec<(String, String)>, &str), &'static str> {
    let mut labels = Vec::new();
    let mut rest = s;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest.find('=').ok_or("label without '='")?;
        let key = rest[..eq].trim().to_string();
        rest = rest[eq + 1..]
            .trim_start()
            .strip_prefix('"')
            .ok_or("label value must be quoted")?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err("dangling escape"),
                },
                Some((_, c)) => value.push(c),
                None => return Err("unterminated label value"),
            }
        };
        labels.push((key, value));
        rest = &rest[end + 1..];
    }
}

fn parse_value(s: &str) -> Option<f64> {
    match s {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn values() {
        assert_eq!(format_value(5.0), "5");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(-1.5), "-1.5");
    }

    #[test]
    fn escaped_label_survives_parse() {
        let line = r#"m{path="a\"b\\c\nd",le="+Inf"} 3"#;
        let s = parse_line(line).unwrap();
        assert_eq!(s.label("path"), Some("a\"b\\c\nd"));
        assert_eq!(s.label("le"), Some("+Inf"));
        assert_eq!(s.value, 3.0);
    }

    #[test]
    fn bare_and_timestamped_lines() {
        let samples = parse_samples("# HELP up x\n# TYPE up gauge\nup 1\nreqs{a=\"b\"} 2 1700000000\n").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(find_value(&samples, "up", &[]), Some(1.0));
        assert_eq!(find_value(&samples, "reqs", &[("a", "b")]), Some(2.0));
    }

    #[test]
    fn garbage_rejected() {
        let err = parse_samples("ok 1\nbroken{a=\"x} 1\n").unwrap_err();
        assert_eq!(err.code().as_str(), "MALFORMED_EXPOSITION");
    }
}
