//! `opsdeck`: drive the operation engine from the command line.
//!
//! Seeds an in-memory store, runs one command against it, prints the result
//! as JSON on stdout, and drains the engine before exiting. Diagnostics go
//! to stderr through `tracing`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use opsdeck_core::{
    Metadata, NewIncident, OperationType, Severity, TargetType, REPLICAS_KEY, VERSION_KEY,
};
use opsdeck_server::{
    EngineConfig, EntityStore, LogWindow, OperationEngine, SeedData, StepDelays,
};
use serde_json::{json, Value};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "opsdeck",
    version,
    about = "Trigger remediation operations against a mock control plane"
)]
struct Cli {
    /// JSON seed file. The built-in catalog is used when omitted.
    #[arg(long, env = "OPSDECK_SEED")]
    seed: Option<PathBuf>,

    /// Delay before an operation starts running, in milliseconds.
    #[arg(long, env = "OPSDECK_SETTLE_MS")]
    settle_ms: Option<u64>,

    /// Delay between entering `running` and the effect, in milliseconds.
    #[arg(long, env = "OPSDECK_WORK_MS")]
    work_ms: Option<u64>,

    #[arg(long, env = "OPSDECK_RESTART_MS")]
    restart_ms: Option<u64>,

    #[arg(long, env = "OPSDECK_SCALE_MS")]
    scale_ms: Option<u64>,

    #[arg(long, env = "OPSDECK_DEPLOY_MS")]
    deploy_ms: Option<u64>,

    /// Maximum number of operations executing at once.
    #[arg(long, env = "OPSDECK_MAX_CONCURRENT")]
    max_concurrent: Option<u32>,

    /// How long to wait for in-flight operations on exit, in milliseconds.
    #[arg(long, env = "OPSDECK_DRAIN_TIMEOUT_MS")]
    drain_timeout_ms: Option<u64>,

    /// Interval between operation status polls, in milliseconds.
    #[arg(long, env = "OPSDECK_POLL_INTERVAL_MS", default_value_t = 100)]
    poll_interval_ms: u64,

    /// Emit diagnostics as JSON lines instead of human-readable text.
    #[arg(long, env = "OPSDECK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Restart a service.
    Restart { service: String },
    /// Scale a service to a replica count.
    Scale { service: String, replicas: String },
    /// Deploy a version to a service.
    Deploy { service: String, version: String },
    /// Run one operation type against several services concurrently.
    Batch {
        /// restart, scale, or deploy.
        op_type: OperationType,
        #[arg(required = true)]
        services: Vec<String>,
        /// Replica count for scale.
        #[arg(long)]
        replicas: Option<String>,
        /// Version for deploy.
        #[arg(long)]
        version: Option<String>,
    },
    /// Manage incidents.
    Incident {
        #[command(subcommand)]
        action: IncidentCommand,
    },
    /// List the service catalog.
    Services,
    /// Show a service's log lines.
    Logs {
        service: String,
        #[arg(long, default_value_t = opsdeck_server::store::DEFAULT_LOG_LIMIT)]
        limit: usize,
        /// Show the newest lines instead of the oldest.
        #[arg(long)]
        tail: bool,
    },
}

#[derive(Debug, Subcommand)]
enum IncidentCommand {
    /// Open a new incident against a service.
    Open {
        service: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "low")]
        severity: Severity,
    },
    /// Acknowledge an incident.
    Ack {
        id: String,
        #[arg(long, default_value = "system")]
        actor: String,
    },
    /// Resolve an incident.
    Resolve {
        id: String,
        #[arg(long, default_value = "system")]
        actor: String,
    },
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        let delays: &mut StepDelays = &mut config.delays;
        let overrides = [
            (self.settle_ms, &mut delays.settle),
            (self.work_ms, &mut delays.work),
            (self.restart_ms, &mut delays.restart),
            (self.scale_ms, &mut delays.scale),
            (self.deploy_ms, &mut delays.deploy),
        ];
        for (ms, slot) in overrides {
            if let Some(ms) = ms {
                *slot = Duration::from_millis(ms);
            }
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_operations = max;
        }
        if let Some(ms) = self.drain_timeout_ms {
            config.drain_timeout = Duration::from_millis(ms);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let store = Arc::new(EntityStore::new());
    let seed = match &cli.seed {
        Some(path) => SeedData::load(path)?,
        None => SeedData::builtin()?,
    };
    seed.apply(&store).context("failed to seed entity store")?;

    let config = cli.engine_config();
    let engine = OperationEngine::new(Arc::clone(&store), &config);
    let poll = Duration::from_millis(cli.poll_interval_ms.max(1));

    let result = run_command(&engine, cli.command, poll).await;
    if let Ok(output) = &result {
        println!("{}", serde_json::to_string_pretty(output)?);
    }

    if !engine.shutdown(config.drain_timeout).await {
        warn!("exiting with operations still in flight");
    }
    result.map(drop)
}

async fn run_command(
    engine: &OperationEngine,
    command: Command,
    poll: Duration,
) -> anyhow::Result<Value> {
    let store = engine.store();
    match command {
        Command::Restart { service } => {
            run_operation(engine, OperationType::Restart, &service, Metadata::new(), poll).await
        }
        Command::Scale { service, replicas } => {
            let mut metadata = Metadata::new();
            metadata.insert(REPLICAS_KEY.to_string(), Value::String(replicas));
            run_operation(engine, OperationType::Scale, &service, metadata, poll).await
        }
        Command::Deploy { service, version } => {
            let mut metadata = Metadata::new();
            metadata.insert(VERSION_KEY.to_string(), Value::String(version));
            run_operation(engine, OperationType::Deploy, &service, metadata, poll).await
        }
        Command::Batch {
            op_type,
            services,
            replicas,
            version,
        } => {
            let mut metadata = Metadata::new();
            if let Some(replicas) = replicas {
                metadata.insert(REPLICAS_KEY.to_string(), Value::String(replicas));
            }
            if let Some(version) = version {
                metadata.insert(VERSION_KEY.to_string(), Value::String(version));
            }
            run_batch(engine, op_type, &services, &metadata, poll).await
        }
        Command::Incident { action } => run_incident(store, action),
        Command::Services => {
            let services = store.list_services();
            Ok(json!({ "count": services.len(), "services": services }))
        }
        Command::Logs {
            service,
            limit,
            tail,
        } => {
            let page = store.read_logs(&service, LogWindow { limit, tail })?;
            let lines: Vec<String> = page.lines.iter().map(ToString::to_string).collect();
            Ok(json!({ "service_id": service, "total": page.total, "lines": lines }))
        }
    }
}

/// Triggers one operation, waits for it to finish, and reports the final
/// operation, the service, and the log lines it appended.
async fn run_operation(
    engine: &OperationEngine,
    op_type: OperationType,
    service_id: &str,
    metadata: Metadata,
    poll: Duration,
) -> anyhow::Result<Value> {
    let store = engine.store();
    let log_offset = store
        .read_logs(service_id, LogWindow { limit: 0, tail: false })
        .map_or(0, |page| page.total);

    let op = engine
        .trigger(op_type, TargetType::Service, service_id, metadata)
        .with_context(|| format!("failed to trigger {op_type} on {service_id}"))?;
    let done = tokio::select! {
        done = engine.wait_for(&op.id, poll) => done?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted while waiting for {}", op.id),
    };

    let service = store.get_service(service_id)?;
    let logs: Vec<String> = store
        .logs_since(service_id, log_offset)?
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(json!({ "operation": done, "service": service, "logs": logs }))
}

/// Triggers `op_type` on every service before waiting on any of them, then
/// reports every operation the store holds.
async fn run_batch(
    engine: &OperationEngine,
    op_type: OperationType,
    services: &[String],
    metadata: &Metadata,
    poll: Duration,
) -> anyhow::Result<Value> {
    let mut triggered = Vec::with_capacity(services.len());
    for service_id in services {
        let op = engine
            .trigger(op_type, TargetType::Service, service_id, metadata.clone())
            .with_context(|| format!("failed to trigger {op_type} on {service_id}"))?;
        triggered.push(op);
    }
    for op in &triggered {
        tokio::select! {
            done = engine.wait_for(&op.id, poll) => { done?; }
            _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted while waiting for {}", op.id),
        }
    }
    let operations = engine.store().list_operations();
    Ok(json!({ "count": operations.len(), "operations": operations }))
}

fn run_incident(store: &EntityStore, action: IncidentCommand) -> anyhow::Result<Value> {
    let incident = match action {
        IncidentCommand::Open {
            service,
            title,
            severity,
        } => store.create_incident(NewIncident {
            service_id: service,
            title,
            severity,
        })?,
        IncidentCommand::Ack { id, actor } => store.acknowledge_incident(&id, &actor)?,
        IncidentCommand::Resolve { id, actor } => store.resolve_incident(&id, &actor)?,
    };
    Ok(json!({ "incident": incident }))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Ignore the error if a subscriber is already installed.
    let _ = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
}
