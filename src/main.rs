use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cowork_runner::policy::{ConfirmationHandler, LineConfirmation};
use cowork_runner::sandbox::DockerEngine;
use cowork_runner::{Config, Executor, Plan, Policy, PolicyEngine, SandboxRuntime, ToolRegistry};

const DEFAULT_CONFIG_PATH: &str = "config/cowork.toml";

fn print_help() {
    println!(
        "\
cowork-runner v{}

Executes a task plan step by step. Tools are gated by an access policy and
shell commands run in disposable containers.

USAGE:
    cowork-runner [OPTIONS] PLAN_PATH
    cowork-runner [OPTIONS] --capabilities
    cowork-runner [OPTIONS] --health

ARGUMENTS:
    PLAN_PATH    Plan document (JSON: goal, steps[], summary, ...)

OPTIONS:
    -c, --config <PATH>    TOML configuration file [default: {DEFAULT_CONFIG_PATH}]
        --capabilities     Print the tool capability list as JSON and exit
        --health           Print the sandbox health report as JSON and exit
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

The execution result is printed to stdout as JSON; logs go to stderr.
The exit status is 0 only when every step succeeded.

ENVIRONMENT VARIABLES:
    Variables are referenced in config and policy files via ${{VAR_NAME}}.

    RUST_LOG    Log level filter for tracing (e.g. debug, cowork_runner=debug)

EXAMPLES:
    cowork-runner plan.json
    cowork-runner -c /etc/cowork/cowork.toml plan.json
    RUST_LOG=debug cowork-runner --health",
        env!("CARGO_PKG_VERSION"),
    );
}

enum Mode {
    Run(String),
    Capabilities,
    Health,
}

struct Args {
    config_path: Option<String>,
    mode: Mode,
}

fn parse_args() -> Result<Args> {
    let mut config_path = None;
    let mut mode = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("cowork-runner v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("{arg} needs a path"))?,
                );
            }
            "--capabilities" => mode = Some(Mode::Capabilities),
            "--health" => mode = Some(Mode::Health),
            other if other.starts_with('-') => return Err(anyhow!("Unknown option: {other}")),
            path => mode = Some(Mode::Run(path.to_string())),
        }
    }
    let mode = mode.ok_or_else(|| anyhow!("Missing PLAN_PATH (see --help)"))?;
    Ok(Args { config_path, mode })
}

fn load_config(explicit: Option<&str>) -> Result<Config> {
    match explicit {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from {DEFAULT_CONFIG_PATH}");
            Config::load(DEFAULT_CONFIG_PATH)
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    // Logs on stderr; stdout carries the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cowork_runner=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config_path.as_deref())?;

    let policy = match &config.policy.path {
        Some(path) => {
            info!("Loading policy from {}", path.display());
            Policy::load(path)?
        }
        None => {
            warn!("No policy file configured: every folder is inaccessible");
            Policy::default()
        }
    };
    info!(
        "Policy: {} folder rule(s), {} tool rule(s), network {}",
        policy.folders.len(),
        policy.tools.len(),
        if policy.allow_network { "allowed" } else { "blocked" }
    );

    let confirmation: Arc<dyn ConfirmationHandler> =
        Arc::new(LineConfirmation::new(BufReader::new(tokio::io::stdin())));
    let policy = Arc::new(PolicyEngine::new(policy).with_confirmation(confirmation.clone()));

    let engine = Arc::new(DockerEngine::new(config.sandbox.engine.clone()));
    let sandbox = Arc::new(SandboxRuntime::new(
        engine,
        config.sandbox.clone(),
        policy.allow_network(),
    ));
    if let Err(e) = sandbox.start().await {
        warn!("{e}; run_command steps will fail");
    }

    let registry = Arc::new(ToolRegistry::with_builtins(
        sandbox.clone(),
        Some(confirmation),
    ));
    info!("Tools: {}", registry.names().join(", "));

    let plan_path = match args.mode {
        Mode::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&registry.capabilities())?);
            return Ok(());
        }
        Mode::Health => {
            let report = sandbox.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                std::process::exit(1);
            }
            return Ok(());
        }
        Mode::Run(path) => path,
    };

    info!("Loading plan from {plan_path}");
    let raw = std::fs::read_to_string(&plan_path)
        .map_err(|e| anyhow!("Cannot read plan {plan_path}: {e}"))?;
    let plan = Plan::from_document(&raw)?;

    let executor = Executor::new(registry, policy.clone(), &config.executor);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let result = executor.execute_with_cancel(plan, None, cancel).await;
    info!(
        "Audit log: {} entr(ies) for {}",
        policy.audit().entries_for_task(&result.context.task_id).len(),
        result.context.task_id
    );

    if sandbox.is_available() {
        let report = sandbox.health_check().await;
        if !report.leaked.is_empty() {
            warn!("Leftover sandbox containers: {}", report.leaked.join(", "));
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
