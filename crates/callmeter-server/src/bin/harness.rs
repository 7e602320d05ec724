//! callmeter-harness: run metric instances and verify registry isolation.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use callmeter_core::error::Result;
use callmeter_core::RegistryScope;
use callmeter_server::harness::{InstanceSpec, IsolationHarness, RunningInstance};

#[derive(Parser)]
#[command(name = "callmeter-harness")]
#[command(version, about = "Metric registry isolation harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one instance and keep serving its metrics.
    Worker(WorkerArgs),
    /// Run one global and N-1 isolated instances in-process and verify them.
    Check(CheckArgs),
}

#[derive(Args)]
struct WorkerArgs {
    #[arg(long)]
    instance_id: u32,

    #[arg(long)]
    port: u16,

    #[arg(long, default_value_t = 100)]
    operations: u64,

    #[arg(long, value_enum, default_value_t = RegistryArg::Isolated)]
    registry: RegistryArg,

    #[arg(long)]
    fail_every: Option<u64>,

    /// Keep serving this long after the workload finishes.
    #[arg(long, default_value_t = 30)]
    linger_secs: u64,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long, default_value_t = 3)]
    instances: u32,

    /// 0 picks ephemeral ports.
    #[arg(long, default_value_t = 0)]
    base_port: u16,

    #[arg(long, default_value_t = 100)]
    operations: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum RegistryArg {
    Global,
    Isolated,
}

impl From<RegistryArg> for RegistryScope {
    fn from(r: RegistryArg) -> Self {
        match r {
            RegistryArg::Global => RegistryScope::Global,
            RegistryArg::Isolated => RegistryScope::Isolated,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let res = match cli.command {
        Command::Worker(args) => worker(args).await,
        Command::Check(args) => check(args).await,
    };

    match res {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "harness failed");
            ExitCode::from(2)
        }
    }
}

async fn worker(args: WorkerArgs) -> Result<bool> {
    let mut spec = InstanceSpec::new(args.instance_id, args.registry.into(), args.operations)
        .port(args.port);
    if let Some(n) = args.fail_every {
        spec = spec.fail_every(n);
    }

    let instance = RunningInstance::start(spec).await?;
    instance.run_workload().await?;

    tracing::info!(
        addr = %instance.addr(),
        linger_secs = args.linger_secs,
        "workload done, still serving"
    );
    tokio::time::sleep(Duration::from_secs(args.linger_secs)).await;
    instance.shutdown().await;
    Ok(true)
}

async fn check(args: CheckArgs) -> Result<bool> {
    let harness = IsolationHarness::standard(args.instances, args.base_port, args.operations)?;
    let report = harness.run().await?;

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "report serialization failed"),
    }
    Ok(report.is_clean())
}
