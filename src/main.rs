use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitmirror::health::CheckResult;
use gitmirror::shutdown::{cleanup, wait_for_signal};
use gitmirror::{BackupEngine, Config, HealthCheck, LogLevel, PublishOutcome, SystemRunner};

/// Exit code for a run stopped by SIGINT or SIGTERM
const EXIT_INTERRUPTED: u8 = 2;

#[derive(Parser)]
#[command(name = "gitmirror")]
#[command(about = "Mirror a directory into a git repository and publish it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides RUST_LOG and the config file
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Verbose logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Mirror, commit and push once (default)
    Run,

    /// System health check and diagnostics
    Doctor,

    /// Write a configuration file
    Init {
        /// Directory to back up
        #[arg(long)]
        source: String,

        /// Backup directory (becomes the git working tree)
        #[arg(long)]
        backup: String,

        /// Remote repository URL
        #[arg(long)]
        remote: String,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&cli).await,
        Commands::Doctor => cmd_doctor(&cli).await,
        Commands::Init {
            source,
            backup,
            remote,
            force,
        } => {
            init_logging(&cli, None);
            match cmd_init(&cli, source, backup, remote, force) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => fatal(&e),
            }
        }
    }
}

/// Install the global subscriber.
///
/// Precedence: `-v`, then `--log-level`, then `RUST_LOG`, then the config file.
fn init_logging(cli: &Cli, config_level: Option<LogLevel>) {
    let filter = if cli.verbose {
        EnvFilter::new(LogLevel::Debug.as_str())
    } else if let Some(level) = cli.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config_level.unwrap_or_default().as_str()))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load(&Config::default_config_path()?),
    }
}

/// Print one diagnostic line; the full chain only when debug logging is on
fn fatal(err: &anyhow::Error) -> ExitCode {
    if tracing::enabled!(Level::DEBUG) {
        eprintln!("gitmirror: {:?}", err);
    } else {
        eprintln!("gitmirror: {:#}", err);
    }
    ExitCode::FAILURE
}

async fn cmd_run(cli: &Cli) -> ExitCode {
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli, None);
            return fatal(&e);
        }
    };
    init_logging(cli, Some(config.log_level));
    debug!("Loaded configuration: {:?}", config);

    let engine = BackupEngine::from_config(&config);

    tokio::select! {
        result = engine.run() => match result {
            Ok(report) => {
                match report.outcome {
                    PublishOutcome::NoChange => info!("Backup is up to date"),
                    PublishOutcome::Published { pushed: false, .. } => {
                        info!("Backup committed locally; push will be retried on the next change")
                    }
                    PublishOutcome::Published { .. } => info!("Backup published"),
                }
                ExitCode::SUCCESS
            }
            Err(e) => fatal(&anyhow::Error::new(e)),
        },
        interrupt = wait_for_signal() => {
            cleanup(interrupt, engine.target());
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn cmd_doctor(cli: &Cli) -> ExitCode {
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli, None);
            return fatal(&e);
        }
    };
    init_logging(cli, Some(config.log_level));

    let health = HealthCheck::run(&config, Arc::new(SystemRunner::new())).await;
    print_health_report(&health);

    if health.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_init(cli: &Cli, source: String, backup: String, remote: String, force: bool) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            config_path.display()
        );
    }

    // Paths given on the command line are relative to where it runs
    let mut config = Config::new(source, backup, remote);
    config.validate()?;
    config.expand_paths(&std::env::current_dir()?)?;
    config.save(&config_path)?;

    println!("Configuration saved to: {}", config_path.display());
    println!("Run `gitmirror doctor` to check it");

    Ok(())
}

fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 gitmirror Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
