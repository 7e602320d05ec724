//! Multi-instance isolation check.
//!
//! Each instance owns a registry (the global one or a fresh isolated one),
//! serves `/metrics` on its own port, and drives an instrumented async
//! workload. Once every workload has finished, the harness scrapes each
//! port over HTTP and compares what it sees with what that instance did.
//! Any difference means either cross-contamination between registries or
//! lost updates.

use std::collections::HashSet;
use std::net::SocketAddr;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use callmeter_core::error::{MetricsError, Result};
use callmeter_core::exposition::{find_value, parse_samples, Sample};
use callmeter_core::instrument::{CALLS_IN_FLIGHT, CALLS_TOTAL, CALL_DURATION};
use callmeter_core::{Outcome, Registry, RegistryScope};

use crate::app_state::AppState;
use crate::ops::InstanceInfo;
use crate::router::build_router;

/// Function label the workload is instrumented under unless overridden.
pub const WORKLOAD_FUNCTION: &str = "f";

#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub instance_id: u32,
    /// 0 binds an ephemeral port.
    pub port: u16,
    pub scope: RegistryScope,
    pub operations: u64,
    /// Every n-th call fails.
    pub fail_every: Option<u64>,
    pub function: String,
}

impl InstanceSpec {
    pub fn new(instance_id: u32, scope: RegistryScope, operations: u64) -> Self {
        Self {
            instance_id,
            port: 0,
            scope,
            operations,
            fail_every: None,
            function: WORKLOAD_FUNCTION.to_string(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = name.into();
        self
    }

    fn fails(&self, call: u64) -> bool {
        matches!(self.fail_every, Some(n) if call % n == 0)
    }

    pub fn expected_failures(&self) -> u64 {
        match self.fail_every {
            Some(n) if n > 0 => self.operations / n,
            _ => 0,
        }
    }

    pub fn expected_successes(&self) -> u64 {
        self.operations - self.expected_failures()
    }

    fn validate(&self) -> Result<()> {
        if self.fail_every == Some(0) {
            return Err(MetricsError::InvalidConfig(format!(
                "instance {}: fail_every must be at least 1",
                self.instance_id
            )));
        }
        Ok(())
    }
}

/// One instance: its state plus the server task serving it.
pub struct RunningInstance {
    spec: InstanceSpec,
    state: AppState,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl RunningInstance {
    /// Obtain the registry, bind the port and start serving.
    pub async fn start(spec: InstanceSpec) -> Result<Self> {
        spec.validate()?;

        let registry = Registry::create(spec.scope == RegistryScope::Isolated);
        let state = AppState::new(registry, spec.instance_id);
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", spec.port))
            .await
            .map_err(|e| {
                MetricsError::Internal(format!("bind port {} failed: {e}", spec.port))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| MetricsError::Internal(format!("local addr: {e}")))?;

        let (tx, rx) = oneshot::channel::<()>();
        let instance_id = spec.instance_id;
        let server = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(instance_id, error = %e, "instance server failed");
            }
        });

        tracing::info!(
            instance_id,
            %addr,
            registry_id = state.registry().id(),
            registry_scope = state.registry().scope().as_str(),
            "instance serving"
        );

        Ok(Self {
            spec,
            state,
            addr,
            shutdown: Some(tx),
            server,
        })
    }

    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run every operation of the workload concurrently and wait for all.
    pub async fn run_workload(&self) -> Result<()> {
        let spec = &self.spec;
        let workload = self
            .state
            .instrument()
            .name(spec.function.as_str())
            .wrap_async(|(call, fail): (u64, bool)| async move {
                tokio::task::yield_now().await;
                if fail {
                    Err(call)
                } else {
                    Ok(call)
                }
            })?;

        let calls = (1..=spec.operations).map(|i| workload.call((i, spec.fails(i))));
        let failed = join_all(calls).await.iter().filter(|r| r.is_err()).count();

        tracing::info!(
            instance_id = spec.instance_id,
            operations = spec.operations,
            failed,
            "workload finished"
        );
        Ok(())
    }

    /// Fetch `/metrics` and `/info` over HTTP.
    pub async fn scrape(&self, client: &reqwest::Client) -> Result<(Vec<Sample>, InstanceInfo)> {
        let text = get_text(client, &format!("http://{}/metrics", self.addr)).await?;
        let samples = parse_samples(&text)?;

        let raw = get_text(client, &format!("http://{}/info", self.addr)).await?;
        let info: InstanceInfo = serde_json::from_str(&raw)
            .map_err(|e| MetricsError::Internal(format!("bad /info body: {e}")))?;

        Ok((samples, info))
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.server).await {
            tracing::warn!(instance_id = self.spec.instance_id, error = %e, "server task join failed");
        }
    }
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| MetricsError::Internal(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(MetricsError::Internal(format!(
            "GET {url}: status {}",
            resp.status()
        )));
    }
    resp.text()
        .await
        .map_err(|e| MetricsError::Internal(format!("GET {url}: {e}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceObservation {
    pub instance_id: u32,
    pub registry_id: u64,
    pub registry_scope: String,
    pub expected_success: u64,
    pub expected_failure: u64,
    pub observed_success: f64,
    pub observed_failure: f64,
    pub duration_count: f64,
    pub in_flight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsolationReport {
    pub instances: Vec<InstanceObservation>,
    pub violations: Vec<String>,
}

impl IsolationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct IsolationHarness {
    specs: Vec<InstanceSpec>,
}

impl IsolationHarness {
    /// At most one instance may use the global registry, and instance ids must
    /// be unique.
    pub fn new(specs: Vec<InstanceSpec>) -> Result<Self> {
        let globals = specs
            .iter()
            .filter(|s| s.scope == RegistryScope::Global)
            .count();
        if globals > 1 {
            return Err(MetricsError::InvalidConfig(format!(
                "{globals} instances request the global registry; at most one may"
            )));
        }

        let mut ids = HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !ids.insert(spec.instance_id) {
                return Err(MetricsError::InvalidConfig(format!(
                    "duplicate instance id {}",
                    spec.instance_id
                )));
            }
        }

        Ok(Self { specs })
    }

    /// Instance 0 on the global registry, the rest isolated, on consecutive
    /// ports from `base_port` (all ephemeral when `base_port` is 0).
    pub fn standard(instances: u32, base_port: u16, operations: u64) -> Result<Self> {
        let specs = (0..instances)
            .map(|id| -> Result<InstanceSpec> {
                let scope = if id == 0 {
                    RegistryScope::Global
                } else {
                    RegistryScope::Isolated
                };
                let port = if base_port == 0 {
                    0
                } else {
                    u16::try_from(id)
                        .ok()
                        .and_then(|offset| base_port.checked_add(offset))
                        .ok_or_else(|| {
                            MetricsError::InvalidConfig(format!(
                                "instance {id}: port {base_port} + {id} exceeds {}",
                                u16::MAX
                            ))
                        })?
                };
                Ok(InstanceSpec::new(id, scope, operations).port(port))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(specs)
    }

    pub fn specs(&self) -> &[InstanceSpec] {
        &self.specs
    }

    pub async fn run(&self) -> Result<IsolationReport> {
        let started = join_all(self.specs.iter().cloned().map(RunningInstance::start)).await;
        let mut running = Vec::with_capacity(started.len());
        let mut first_err = None;
        for r in started {
            match r {
                Ok(inst) => running.push(inst),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            for inst in running {
                inst.shutdown().await;
            }
            return Err(e);
        }

        let outcome = self.observe(&running).await;
        for inst in running {
            inst.shutdown().await;
        }
        outcome
    }

    async fn observe(&self, running: &[RunningInstance]) -> Result<IsolationReport> {
        for r in join_all(running.iter().map(|i| i.run_workload())).await {
            r?;
        }

        let client = reqwest::Client::new();
        let mut instances = Vec::with_capacity(running.len());
        let mut violations = Vec::new();
        let mut seen_registries: Vec<(u64, u32)> = Vec::new();

        for inst in running {
            let (samples, info) = inst.scrape(&client).await?;
            let spec = inst.spec();
            let obs = observe_instance(spec, &samples, &info);
            check_instance(spec, &obs, &samples, &mut violations);

            if let Some((_, other)) = seen_registries.iter().find(|(id, _)| *id == info.registry_id) {
                violations.push(format!(
                    "instance {} shares registry {} with instance {}",
                    spec.instance_id, info.registry_id, other
                ));
            }
            seen_registries.push((info.registry_id, spec.instance_id));
            instances.push(obs);
        }

        for v in &violations {
            tracing::warn!(violation = %v, "isolation violation");
        }
        tracing::info!(
            instances = instances.len(),
            violations = violations.len(),
            "isolation check finished"
        );

        Ok(IsolationReport {
            instances,
            violations,
        })
    }
}

fn observe_instance(spec: &InstanceSpec, samples: &[Sample], info: &InstanceInfo) -> InstanceObservation {
    let f = ("function", spec.function.as_str());
    let calls = |outcome: Outcome| {
        find_value(samples, CALLS_TOTAL, &[f, ("outcome", outcome.as_str())]).unwrap_or(f64::NAN)
    };

    InstanceObservation {
        instance_id: spec.instance_id,
        registry_id: info.registry_id,
        registry_scope: info.registry_scope.clone(),
        expected_success: spec.expected_successes(),
        expected_failure: spec.expected_failures(),
        observed_success: calls(Outcome::Success),
        observed_failure: calls(Outcome::Failure),
        duration_count: find_value(samples, &format!("{CALL_DURATION}_count"), &[f])
            .unwrap_or(f64::NAN),
        in_flight: find_value(samples, CALLS_IN_FLIGHT, &[f]).unwrap_or(f64::NAN),
    }
}

fn check_instance(
    spec: &InstanceSpec,
    obs: &InstanceObservation,
    samples: &[Sample],
    violations: &mut Vec<String>,
) {
    let id = spec.instance_id;
    let mut expect = |what: &str, expected: u64, observed: f64| {
        if observed != expected as f64 {
            violations.push(format!(
                "instance {id}: {what} expected {expected}, observed {observed}"
            ));
        }
    };
    expect("successes", obs.expected_success, obs.observed_success);
    expect("failures", obs.expected_failure, obs.observed_failure);
    expect("duration count", obs.expected_success, obs.duration_count);
    expect("in-flight", 0, obs.in_flight);

    if obs.registry_scope != spec.scope.as_str() {
        violations.push(format!(
            "instance {id}: serves a {} registry, wanted {}",
            obs.registry_scope,
            spec.scope.as_str()
        ));
    }

    // An isolated registry only ever sees its own workload.
    if spec.scope == RegistryScope::Isolated {
        for s in samples.iter().filter(|s| s.name == CALLS_TOTAL) {
            if let Some(other) = s.label("function").filter(|f| *f != spec.function) {
                violations.push(format!(
                    "instance {id}: foreign function {other:?} in isolated registry"
                ));
            }
        }
    }
}
