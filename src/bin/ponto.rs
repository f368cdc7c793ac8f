//! CLI binary for ponto.

use chrono::Local;
use clap::{Parser, Subcommand};
use ponto::clock::{Clock, SystemClock};
use ponto::config::LoggingConfig;
use ponto::credentials::Credentials;
use ponto::engine::{AutomationEngine, AutomationEvent, RunOutcome, StartRequest};
use ponto::notify::build_notifier;
use ponto::portal::ObservedPunch;
use ponto::portal::driver::DriverConnector;
use ponto::{ClockTime, PontoConfig, Reconciler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Ponto: automated time-clock punching.
#[derive(Parser)]
#[command(name = "ponto", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the automation until stopped with Ctrl+C.
    Run,

    /// Show the next punch without touching the portal.
    Plan {
        /// Punches already made today, e.g. `08:10,12:02`.
        #[arg(long, value_delimiter = ',')]
        observed: Vec<String>,
    },

    /// Validate the configuration file.
    CheckConfig,

    /// Write a starter configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(PontoConfig::default_config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig { force } => init_config(&config_path, force),
        Command::CheckConfig => check_config(&config_path),
        Command::Plan { observed } => {
            let config = PontoConfig::from_file(&config_path)?;
            show_plan(&config, &observed)
        }
        Command::Run => {
            let config = PontoConfig::from_file(&config_path)?;
            let _guard = init_tracing(&config.logging)?;
            run(config).await
        }
    }
}

/// Install the stderr logger and, when enabled, a daily rolling log file.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let default_filter = logging.filter.as_deref().unwrap_or("ponto=info");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = if logging.file {
        let dir = ponto::paths::logs_dir();
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "ponto.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    PontoConfig::template().save_to_file(path)?;
    println!("Wrote {}", path.display());
    println!("Set PONTO_FOLHA and store the password with your OS keyring (service \"ponto\", user \"senha\").");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = PontoConfig::from_file(path)?;
    let warnings = config.validate()?;
    for warning in &warnings {
        println!("warning: {warning}");
    }
    println!("{} is valid", path.display());
    Ok(())
}

fn show_plan(config: &PontoConfig, observed: &[String]) -> anyhow::Result<()> {
    let now = Local::now().naive_local();
    let today = now.date();
    let observed: Vec<ObservedPunch> = observed
        .iter()
        .map(|raw| {
            ClockTime::parse_lenient(raw)
                .map(|time| ObservedPunch::new(today, time))
                .ok_or_else(|| anyhow::anyhow!("invalid punch time `{raw}`"))
        })
        .collect::<anyhow::Result<_>>()?;

    let settings = config.engine.settings();
    let reconciler = Reconciler {
        lookahead_days: settings.lookahead_days,
        tolerance: chrono::Duration::from_std(settings.tolerance)?,
    };
    let schedule = config.schedule.store().get()?;
    let plan = reconciler.plan(&schedule, &observed, now);

    if let Some(day) = &plan.today {
        println!("Today ({}):", day.date.format("%d/%m/%Y"));
        for slot in &day.slots {
            let observed = slot
                .observed_time
                .map_or_else(|| "--:--".to_owned(), |time| time.to_string());
            println!(
                "  {:<18} scheduled {}  target {}  observed {}",
                slot.id.label(),
                slot.scheduled_time,
                slot.ideal_time,
                observed
            );
        }
        if let Some(delta) = day.delta_minutes {
            println!("  delta: {delta:+} min");
        }
    } else {
        println!("Today: no punches scheduled");
    }
    for missed in &plan.missed {
        println!("Missed: {} at {}", missed.slot.label(), missed.time);
    }
    match &plan.next {
        Some(next) => println!(
            "Next: {} at {} on {} ({})",
            next.slot.label(),
            next.time,
            next.date().format("%d/%m/%Y"),
            next.day.display_name_pt()
        ),
        None => println!("Next: nothing pending"),
    }
    Ok(())
}

async fn run(config: PontoConfig) -> anyhow::Result<()> {
    println!("Ponto v{}", env!("CARGO_PKG_VERSION"));

    for warning in config.validate()? {
        warn!("{warning}");
    }

    let credentials = Credentials::resolve(&config.credentials.folha, &config.credentials.senha)?;
    let notifier = build_notifier(&config.notifier)?;
    let connector = Arc::new(DriverConnector::from_config(&config.portal));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(AutomationEngine::new(
        connector,
        clock,
        config.engine.settings(),
    ));

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AutomationEvent::Log(entry)) => {
                    println!("[{}] {:<7} {}", entry.at.format("%H:%M:%S"), entry.level, entry.message);
                }
                Ok(AutomationEvent::Status(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Handle Ctrl+C
    let stopper = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, stopping...");
            stopper.stop().await;
        }
    });

    let outcome = engine
        .start(StartRequest {
            schedule: config.schedule.store(),
            credentials,
            notifier,
        })
        .await;
    if !outcome.accepted {
        anyhow::bail!("automation is already running");
    }

    println!("\nRunning. Press Ctrl+C to stop.\n");
    engine.wait().await;

    let status = engine.status();
    println!("{}", status.status_message);
    if status.outcome == Some(RunOutcome::Failed) {
        anyhow::bail!(status.status_message);
    }
    Ok(())
}
