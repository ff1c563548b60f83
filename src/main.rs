use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::ratelimit::{spawn_maintenance, RateLimiter, RequestMeta, DEFAULT_RULE};

/// Admission control policy runner.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay JSON-lines request metadata and print one decision per line
    Replay {
        /// Input file; reads stdin when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Rule applied to lines that do not name one
        #[arg(short, long, default_value = DEFAULT_RULE)]
        rule: String,
    },
    /// Print the effective rules as YAML
    Rules,
}

/// One replayed request: metadata plus an optional rule name.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(flatten)]
    meta: RequestMeta,
    #[serde(default)]
    rule: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => TurnstileConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TurnstileConfig::from_env().context("reading environment overrides")?,
    };

    let limiter = Arc::new(RateLimiter::from_config(&config).context("building rate limiter")?);
    info!(rules = ?limiter.rule_names(), "Rate limiter initialized");

    match cli.command {
        Command::Rules => {
            print!("{}", limiter.rules().to_yaml()?);
        }
        Command::Replay { input, rule } => {
            let maintenance =
                spawn_maintenance(limiter.clone(), config.limiter.maintenance_interval());

            tokio::select! {
                result = replay(&limiter, input, &rule) => result?,
                _ = shutdown_signal() => {}
            }
            maintenance.abort();

            let stats = limiter.all_stats();
            info!(
                clients = stats.total_clients,
                requests = stats.total_requests,
                blocked = stats.total_blocked,
                block_rate = stats.block_rate,
                backend_keys = stats.backend_keys,
                "Replay finished"
            );
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn replay(
    limiter: &RateLimiter,
    input: Option<PathBuf>,
    default_rule: &str,
) -> anyhow::Result<()> {
    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match &input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut lines = BufReader::new(reader).lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: ReplayLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed request line");
                continue;
            }
        };

        let rule = parsed.rule.as_deref().unwrap_or(default_rule);
        let decision = limiter.check_rate_limit(&parsed.meta, rule);

        let mut out = serde_json::to_vec(&decision)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
    }

    stdout.flush().await?;
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping replay");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping replay");
        }
    }
}
