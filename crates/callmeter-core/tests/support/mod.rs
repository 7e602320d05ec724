//! Read helpers shared by the instrumentation tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use callmeter_core::instrument::{CALLS_IN_FLIGHT, CALLS_TOTAL, CALL_DURATION};
use callmeter_core::{HistogramSnapshot, Outcome, Registry};

fn scalar(reg: &Registry, family: &str, labels: &[&str]) -> Option<f64> {
    let fam = reg.family(family)?.snapshot();
    fam.series(labels)?.value.as_f64()
}

pub fn calls(reg: &Registry, function: &str, outcome: Outcome) -> f64 {
    scalar(reg, CALLS_TOTAL, &[function, outcome.as_str()]).expect("counter series")
}

pub fn in_flight(reg: &Registry, function: &str) -> f64 {
    scalar(reg, CALLS_IN_FLIGHT, &[function]).expect("gauge series")
}

pub fn duration(reg: &Registry, function: &str) -> HistogramSnapshot {
    let fam = reg.family(CALL_DURATION).expect("histogram family").snapshot();
    fam.series(&[function])
        .expect("histogram series")
        .value
        .as_histogram()
        .cloned()
        .expect("histogram value")
}
