use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quotagate::config::Settings;
use quotagate::ratelimit::{Decision, FileRuleSource, RateLimiter, RuleSource};
use quotagate::reload::RuleReloader;

#[derive(Debug, Parser)]
#[command(name = "quotagate", version, about = "In-process admission control")]
struct Cli {
    /// Settings file (YAML, JSON or TOML)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a rule document and print its rules
    Validate {
        /// Rule document; defaults to `rules_path` from settings
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Drive admissions against a rule document and report the outcome
    Simulate {
        #[arg(long)]
        rules: Option<PathBuf>,
        #[arg(long)]
        app: String,
        #[arg(long)]
        api: String,
        #[arg(long, default_value_t = 10)]
        requests: u64,
        /// Pause between requests
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
}

#[derive(Debug, Default)]
struct Tally {
    admitted: u64,
    rejected: u64,
    errors: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    init_tracing(&settings);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { rules } => {
            let source = rule_source(rules, &settings)?;
            let config = source
                .load()
                .with_context(|| format!("loading rules from {}", source.describe()))?;

            println!("{} rule(s) in {}", config.len(), source.describe());
            for rule in &config.limits {
                println!("  {}", rule);
            }
        }
        Command::Simulate {
            rules,
            app,
            api,
            requests,
            interval_ms,
        } => {
            let source = rule_source(rules, &settings)?;
            let config = source
                .load()
                .with_context(|| format!("loading rules from {}", source.describe()))?;
            let limiter = Arc::new(RateLimiter::from_settings(&settings, config));
            info!(rules = limiter.rules().len(), "Rate limiter initialized");

            let reloader = (settings.reload_interval_secs > 0)
                .then(|| {
                    RuleReloader::spawn(
                        limiter.clone(),
                        source.clone(),
                        Duration::from_secs(settings.reload_interval_secs),
                    )
                })
                .transpose()?;

            let mut tally = Tally::default();
            tokio::select! {
                _ = simulate(&limiter, &app, &api, requests, interval_ms, &mut tally) => {}
                _ = shutdown_signal() => {
                    warn!("Simulation interrupted");
                }
            }

            if let Some(reloader) = reloader {
                reloader.shutdown().await;
            }

            println!(
                "admitted={} rejected={} internal_errors={}",
                tally.admitted, tally.rejected, tally.errors
            );
        }
    }

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if settings.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn rule_source(rules: Option<PathBuf>, settings: &Settings) -> anyhow::Result<FileRuleSource> {
    let path = rules
        .or_else(|| settings.rules_path.as_ref().map(PathBuf::from))
        .context("no rule document given; pass --rules or set rules_path")?;
    Ok(FileRuleSource::new(path)?)
}

async fn simulate(
    limiter: &RateLimiter,
    app: &str,
    api: &str,
    requests: u64,
    interval_ms: u64,
    tally: &mut Tally,
) {
    for i in 0..requests {
        match limiter.admit(app, api) {
            Ok(Decision::Admitted) => tally.admitted += 1,
            Ok(Decision::Rejected) => tally.rejected += 1,
            Err(e) => {
                warn!(request = i, error = %e, "Limiter failed to decide");
                tally.errors += 1;
            }
        }

        if interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }
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
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotagate::ratelimit::QuotaRule;

    #[tokio::test]
    async fn test_interrupted_simulation_keeps_partial_tally() {
        let limiter = RateLimiter::new();
        limiter.add_rule(QuotaRule::new("app", "/a", 2, 60).unwrap());

        let mut tally = Tally::default();
        let finished = tokio::time::timeout(
            Duration::from_millis(100),
            simulate(&limiter, "app", "/a", 1_000, 10, &mut tally),
        )
        .await;

        assert!(finished.is_err());
        assert_eq!(tally.admitted, 2);
        assert!(tally.rejected > 0);
        assert_eq!(tally.errors, 0);
    }
}
