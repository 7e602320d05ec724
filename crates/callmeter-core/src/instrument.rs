//! Call instrumentation.
//!
//! `Instrument` is the wrapper factory: pick a name, the metric kinds to
//! emit and the target registry, then `wrap` a synchronous callable or
//! `wrap_async` an asynchronous one. Families are registered while
//! wrapping, so a schema conflict surfaces before the first call. Which
//! wrapper gets built fixes the execution strategy; nothing is inspected
//! per call.
//!
//! Every call runs under a `CallGuard`: in-flight gauge +1 on entry, -1 when
//! the guard drops. The guard drops on every exit path: normal return, an
//! `Err` result, a panic unwinding through a sync body, and an async call
//! dropped before it completed.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::family::{CounterVec, GaugeVec, HistogramVec};
use crate::registry::Registry;

pub const CALLS_TOTAL: &str = "function_calls_total";
pub const CALLS_TOTAL_HELP: &str = "Instrumented function calls by function and outcome";
pub const CALL_DURATION: &str = "function_call_duration_seconds";
pub const CALL_DURATION_HELP: &str = "Instrumented function call duration in seconds";
pub const CALLS_IN_FLIGHT: &str = "function_calls_in_flight";
pub const CALLS_IN_FLIGHT_HELP: &str = "Instrumented function calls currently executing";

pub const FUNCTION_LABEL: &str = "function";
pub const OUTCOME_LABEL: &str = "outcome";

pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 7.0, 10.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// How a wrapped body's return value maps to an outcome.
pub trait ClassifyOutcome {
    fn outcome(&self) -> Outcome;
}

impl<T, E> ClassifyOutcome for std::result::Result<T, E> {
    fn outcome(&self) -> Outcome {
        if self.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    Sync,
    Async,
}

/// Shorthand for `Instrument::new()`.
pub fn instrument() -> Instrument {
    Instrument::new()
}

#[derive(Debug, Clone)]
pub struct Instrument {
    name: Option<String>,
    counter: bool,
    histogram: bool,
    gauge: bool,
    registry: Registry,
    buckets: Vec<f64>,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: None,
            counter: true,
            histogram: true,
            gauge: true,
            registry: Registry::global(),
            buckets: DEFAULT_DURATION_BUCKETS.to_vec(),
        }
    }
}

impl Instrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Function label value. Derived from the callable's type when unset.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn counter(mut self, enabled: bool) -> Self {
        self.counter = enabled;
        self
    }

    pub fn histogram(mut self, enabled: bool) -> Self {
        self.histogram = enabled;
        self
    }

    pub fn gauge(mut self, enabled: bool) -> Self {
        self.gauge = enabled;
        self
    }

    pub fn registry(mut self, registry: &Registry) -> Self {
        self.registry = registry.clone();
        self
    }

    /// Duration histogram bounds (seconds). Part of the histogram schema, so
    /// every wrapper sharing a registry must agree on them.
    pub fn buckets(mut self, bounds: &[f64]) -> Self {
        self.buckets = bounds.to_vec();
        self
    }

    /// Wrap a synchronous callable.
    pub fn wrap<F>(self, f: F) -> Result<Instrumented<F>> {
        let function = self.name.clone().unwrap_or_else(callable_name::<F>);
        let probe = self.bind(function, ExecutionModel::Sync)?;
        Ok(Instrumented { f, probe })
    }

    /// Wrap a callable returning a future.
    pub fn wrap_async<F>(self, f: F) -> Result<InstrumentedAsync<F>> {
        let function = self.name.clone().unwrap_or_else(callable_name::<F>);
        let probe = self.bind(function, ExecutionModel::Async)?;
        Ok(InstrumentedAsync { f, probe })
    }

    /// Register the families and bind them to `function` without wrapping
    /// anything. The configured name, if any, is ignored.
    pub fn bind(self, function: impl Into<String>, model: ExecutionModel) -> Result<Probe> {
        let function = function.into();
        let reg = &self.registry;

        let calls = self
            .counter
            .then(|| reg.counter_vec(CALLS_TOTAL, CALLS_TOTAL_HELP, &[FUNCTION_LABEL, OUTCOME_LABEL]))
            .transpose()?;
        let duration = self
            .histogram
            .then(|| reg.histogram_vec(CALL_DURATION, CALL_DURATION_HELP, &[FUNCTION_LABEL], &self.buckets))
            .transpose()?;
        let in_flight = self
            .gauge
            .then(|| reg.gauge_vec(CALLS_IN_FLIGHT, CALLS_IN_FLIGHT_HELP, &[FUNCTION_LABEL]))
            .transpose()?;

        // Zero-valued series so a scrape before the first call is complete.
        if let Some(c) = &calls {
            c.touch(&[function.as_str(), Outcome::Success.as_str()])?;
            c.touch(&[function.as_str(), Outcome::Failure.as_str()])?;
        }
        if let Some(h) = &duration {
            h.touch(&[function.as_str()])?;
        }
        if let Some(g) = &in_flight {
            g.touch(&[function.as_str()])?;
        }

        tracing::debug!(
            function = %function,
            registry_id = reg.id(),
            model = ?model,
            "function instrumented"
        );

        Ok(Probe {
            inner: Arc::new(ProbeInner {
                function,
                model,
                registry: self.registry,
                calls,
                duration,
                in_flight,
            }),
        })
    }
}

/// Stable label for a callable type: every generic argument group and
/// closure suffix stripped, last path segment kept. Methods on generic
/// types keep their own name (`Repo<u8>::load` gives `load`).
pub fn callable_name<F: ?Sized>() -> String {
    let full = std::any::type_name::<F>().trim_start_matches('&');

    let mut path = String::with_capacity(full.len());
    let mut depth = 0usize;
    let mut prev = '\0';
    for c in full.chars() {
        match c {
            '<' => depth += 1,
            // `->` in fn pointer types is not a closing bracket.
            '>' if prev != '-' => depth = depth.saturating_sub(1),
            _ if depth == 0 => path.push(c),
            _ => {}
        }
        prev = c;
    }

    let path = path.trim_end_matches("::{{closure}}");
    path.rsplit("::")
        .find(|seg| !seg.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// Metrics bound to one function label in one registry.
#[derive(Clone, Debug)]
pub struct Probe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug)]
struct ProbeInner {
    function: String,
    model: ExecutionModel,
    registry: Registry,
    calls: Option<CounterVec>,
    duration: Option<HistogramVec>,
    in_flight: Option<GaugeVec>,
}

impl ProbeInner {
    fn report(&self, res: Result<()>) {
        if let Err(e) = res {
            tracing::warn!(function = %self.function, error = %e, "metric update failed");
        }
    }

    fn record(&self, outcome: Outcome, elapsed: Duration) {
        let function = self.function.as_str();
        if let Some(c) = &self.calls {
            self.report(c.inc(&[function, outcome.as_str()]));
        }
        if outcome == Outcome::Success {
            if let Some(h) = &self.duration {
                self.report(h.observe_duration(&[function], elapsed));
            }
        }
    }
}

impl Probe {
    pub fn function(&self) -> &str {
        &self.inner.function
    }

    pub fn execution_model(&self) -> ExecutionModel {
        self.inner.model
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    fn enter(&self) -> CallGuard<'_> {
        let inner = &*self.inner;
        if let Some(g) = &inner.in_flight {
            inner.report(g.inc(&[inner.function.as_str()]));
        }
        CallGuard {
            probe: inner,
            started: Instant::now(),
            settled: false,
        }
    }

    /// Run a synchronous body. The result is returned untouched.
    pub fn run<R, B>(&self, body: B) -> R
    where
        B: FnOnce() -> R,
        R: ClassifyOutcome,
    {
        self.run_classified(body, R::outcome)
    }

    /// Run a body that cannot fail short of panicking; every return is a
    /// success.
    pub fn run_infallible<R, B>(&self, body: B) -> R
    where
        B: FnOnce() -> R,
    {
        self.run_classified(body, |_| Outcome::Success)
    }

    fn run_classified<R, B, C>(&self, body: B, classify: C) -> R
    where
        B: FnOnce() -> R,
        C: FnOnce(&R) -> Outcome,
    {
        let guard = self.enter();
        let out = body();
        guard.settle(classify(&out));
        out
    }

    /// Run an asynchronous body. Duration spans every suspension inside it.
    pub async fn run_async<R, B, Fut>(&self, body: B) -> R
    where
        B: FnOnce() -> Fut,
        Fut: Future<Output = R>,
        R: ClassifyOutcome,
    {
        self.run_async_classified(body, R::outcome).await
    }

    pub async fn run_async_infallible<R, B, Fut>(&self, body: B) -> R
    where
        B: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.run_async_classified(body, |_| Outcome::Success).await
    }

    async fn run_async_classified<R, B, Fut, C>(&self, body: B, classify: C) -> R
    where
        B: FnOnce() -> Fut,
        Fut: Future<Output = R>,
        C: FnOnce(&R) -> Outcome,
    {
        let guard = self.enter();
        let out = body().await;
        guard.settle(classify(&out));
        out
    }
}

struct CallGuard<'a> {
    probe: &'a ProbeInner,
    started: Instant,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.probe.record(outcome, self.started.elapsed());
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            if std::thread::panicking() {
                self.probe.record(Outcome::Failure, self.started.elapsed());
            } else {
                tracing::debug!(
                    function = %self.probe.function,
                    "instrumented call dropped before completion"
                );
            }
        }
        if let Some(g) = &self.probe.in_flight {
            self.probe.report(g.dec(&[self.probe.function.as_str()]));
        }
    }
}

/// A synchronous callable bound to its probe.
#[derive(Clone)]
pub struct Instrumented<F> {
    f: F,
    probe: Probe,
}

impl<F> std::fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumented")
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

impl<F> Instrumented<F> {
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        R: ClassifyOutcome,
    {
        self.probe.run(|| (self.f)(args))
    }

    /// Call a body whose return value carries no outcome (`u32`, `()`,
    /// ...). Only a panic counts as failure.
    pub fn call_infallible<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.probe.run_infallible(|| (self.f)(args))
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    pub fn function(&self) -> &str {
        self.probe.function()
    }
}

/// An asynchronous callable bound to its probe.
#[derive(Clone, Debug)]
pub struct InstrumentedAsync<F> {
    f: F,
    probe: Probe,
}

impl<F> InstrumentedAsync<F> {
    pub async fn call<A, R, Fut>(&self, args: A) -> R
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = R>,
        R: ClassifyOutcome,
    {
        self.probe.run_async(|| (self.f)(args)).await
    }

    /// Await a body whose output carries no outcome; it counts as success.
    pub async fn call_infallible<A, R, Fut>(&self, args: A) -> R
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = R>,
    {
        self.probe.run_async_infallible(|| (self.f)(args)).await
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    pub fn function(&self) -> &str {
        self.probe.function()
    }
}
