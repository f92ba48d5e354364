use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vidnode_api::runtime::{ConfigSource, RuntimeParts};
use vidnode_api::{run_worker, InProcessLauncher};
use vidnode_cluster::coordinator::{ProcessLauncher, WorkerLauncher};
use vidnode_cluster::ipc::WorkerId;
use vidnode_cluster::{Coordinator, CoordinatorOptions, DatabaseHandle};
use vidnode_core::jwt::{generate_secret, JwtService};
use vidnode_core::{logging, Config};

#[derive(Parser, Debug)]
#[command(name = "vidnode")]
#[command(about = "Self-hosted video node: live ingest and HLS playback", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true, env = "VIDNODE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator and its workers (default)
    Coordinator {
        /// Run workers as tasks of this process instead of child processes
        #[arg(long)]
        in_process: bool,
    },
    /// Run one worker; spawned by the coordinator, IPC on stdin/stdout
    Worker {
        #[arg(long)]
        id: WorkerId,
    },
    /// Sign a node operator token with the configured secret
    IssueToken {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = Config::load(path).context("Failed to load configuration")?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Coordinator { in_process: false }) {
        Command::Coordinator { in_process } => {
            logging::init_logging(&config.logging)?;
            run_coordinator(config, args.config, in_process).await
        }
        Command::Worker { id } => {
            logging::init_logging(&config.logging)?;
            run_worker_process(config, args.config, id).await
        }
        Command::IssueToken { subject, ttl_hours } => issue_token(&config, &subject, ttl_hours),
    }
}

async fn run_coordinator(config: Config, config_path: Option<String>, in_process: bool) -> Result<()> {
    info!("VidNode starting...");
    info!("HTTP address: {}", config.http_address());

    let jwt_secret = config.auth.jwt_secret.clone().unwrap_or_else(|| {
        info!("No auth.jwt_secret configured, generated a secret for this run");
        generate_secret()
    });

    let database = DatabaseHandle::open(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;
    info!(path = %config.database.path.display(), "Database ready");

    let shutdown = CancellationToken::new();
    let launcher: Arc<dyn WorkerLauncher> = if in_process || cfg!(not(unix)) {
        info!("Running workers in-process");
        let source = ConfigSource::Load {
            path: config_path.clone(),
        };
        Arc::new(InProcessLauncher::new(config.clone(), source, shutdown.clone()))
    } else {
        Arc::new(ProcessLauncher::current_exe(config_path)?)
    };

    let options = CoordinatorOptions {
        worker_count: config.cluster.worker_count(),
        stats_interval: Duration::from_millis(config.cluster.stats_interval_ms),
        shutdown_grace: Duration::from_secs(config.server.drain_timeout_secs + 5),
    };
    let coordinator = Coordinator::new(launcher, Arc::new(database), jwt_secret, options);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    if let Err(e) = coordinator.run(shutdown).await {
        error!("Coordinator failed: {}", e);
        return Err(e.into());
    }
    info!("VidNode stopped");
    Ok(())
}

async fn run_worker_process(config: Config, config_path: Option<String>, worker_id: WorkerId) -> Result<()> {
    let parts = RuntimeParts::from_config(config, ConfigSource::Load { path: config_path })?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let result = run_worker(
        worker_id,
        parts,
        Box::new(tokio::io::stdin()),
        Box::new(tokio::io::stdout()),
        shutdown,
    )
    .await;
    if let Err(e) = &result {
        error!(worker_id, "Worker failed: {:#}", e);
    }
    result
}

fn issue_token(config: &Config, subject: &str, ttl_hours: Option<i64>) -> Result<()> {
    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .context("auth.jwt_secret must be configured to issue tokens")?;
    let ttl = chrono::Duration::hours(ttl_hours.unwrap_or(config.auth.token_ttl_hours));
    if ttl <= chrono::Duration::zero() {
        anyhow::bail!("--ttl-hours must be positive");
    }

    let token = JwtService::new(secret).sign_token(subject, ttl)?;
    println!("{token}");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_arguments_match_process_launcher() {
        let args = Args::try_parse_from(["vidnode", "--config", "/etc/vidnode.toml", "worker", "--id", "7"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("/etc/vidnode.toml"));
        assert!(matches!(args.command, Some(Command::Worker { id: 7 })));
    }

    #[test]
    fn test_coordinator_is_the_default() {
        let args = Args::try_parse_from(["vidnode"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_issue_token_requires_secret() {
        let config = Config::default();
        assert!(issue_token(&config, "operator", Some(1)).is_err());
    }
}
