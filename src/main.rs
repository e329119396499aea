//! Database Backup/Restore Scheduler
//!
//! Provides CLI interface for scheduled backups, manual runs and restores

// dbvault/src/main.rs
use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use dbvault::backup::{BackupExecutor, sweep};
use dbvault::config::{Catalog, DEFAULT_SETTINGS_FILE, JsonFileStore, Schedule, Settings};
use dbvault::restore::{RestoreExecutor, RestoreOutcome};
use dbvault::scheduler::{CronExpr, ScheduleRegistry};
use dbvault::utils::databases::list_databases;
use dbvault::utils::{BinaryResolver, setup_logging};

#[derive(Parser)]
#[command(name = "dbvault", version, about = "Scheduled database backups and restores")]
struct Cli {
    /// Settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Store file holding connections, schedules and history
    #[arg(long)]
    store: Option<PathBuf>,

    /// Directory with bundled dump/restore tools
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every enabled schedule until interrupted
    Daemon,
    /// Back up one schedule now
    Run { schedule_id: String },
    /// Apply one schedule's retention policy now
    Sweep { schedule_id: String },
    /// Restore a backup file into a database, replacing its contents
    Restore {
        #[arg(long)]
        file: PathBuf,
        /// Target connection id
        #[arg(long)]
        connection: String,
        /// Target database name
        #[arg(long)]
        database: String,
        /// Confirm that the target database may be overwritten
        #[arg(long)]
        yes: bool,
    },
    /// Show recent backup attempts
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Delete every history record instead
        #[arg(long)]
        clear: bool,
    },
    /// Manage schedules; lists them when no action is given
    Schedules {
        #[command(subcommand)]
        action: Option<ScheduleAction>,
    },
    /// Inspect saved database connections
    Connections {
        #[command(subcommand)]
        action: ConnectionAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List schedules with their trigger expressions and next run
    List,
    Enable { schedule_id: String },
    Disable { schedule_id: String },
    Delete { schedule_id: String },
}

#[derive(Subcommand)]
enum ConnectionAction {
    List,
    /// Connect to the server and list its databases
    Test { connection_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run_app(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut settings = Settings::load_from_json(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if let Some(store) = cli.store {
        settings.store_path = store;
    }
    if let Some(tools) = cli.tools_dir {
        settings.tools_directory = tools;
    }

    let catalog = Catalog::new(Arc::new(JsonFileStore::new(&settings.store_path)));
    let resolver = BinaryResolver::new(&settings.tools_directory);
    let executor = BackupExecutor::new(catalog.clone(), resolver.clone());

    match cli.command {
        Command::Daemon => {
            let registry = ScheduleRegistry::new(executor, settings.maintenance_time.clone());
            let active = registry
                .initialize()
                .await
                .context("Failed to start the scheduler")?;
            println!("🚀 Scheduler running with {} active schedule(s). Press Ctrl-C to stop.", active);

            let period = Duration::from_secs(settings.reload_interval_secs);
            let mut reload = tokio::time::interval_at(Instant::now() + period, period);
            reload.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    signal = &mut shutdown => {
                        signal.context("Failed to listen for shutdown signal")?;
                        break;
                    }
                    _ = reload.tick() => {
                        if let Err(e) = registry.reload() {
                            warn!(error = %e, "Failed to reload schedules");
                        }
                    }
                }
            }
            info!("Shutdown requested");
            registry.cancel_all();
        }
        Command::Run { schedule_id } => {
            let schedule = catalog
                .find_schedule(&schedule_id)?
                .with_context(|| format!("Schedule '{}' not found", schedule_id))?;
            let record = executor
                .run_backup(&schedule)
                .await
                .context("Backup process failed")?;
            println!("✅ Backup written to {}", record.backup_file.display());
        }
        Command::Sweep { schedule_id } => {
            let schedule = catalog
                .find_schedule(&schedule_id)?
                .with_context(|| format!("Schedule '{}' not found", schedule_id))?;
            if schedule.retention_days <= 0 {
                println!("Schedule '{}' keeps backups forever; nothing to do.", schedule.name);
                return Ok(());
            }
            let report = sweep(&schedule).await;
            for path in &report.deleted {
                println!("🗑  {}", path.display());
            }
            println!(
                "✅ Removed {} backup(s), {} could not be removed.",
                report.deleted.len(),
                report.failed.len()
            );
        }
        Command::Restore {
            file,
            connection,
            database,
            yes,
        } => {
            if !yes {
                anyhow::bail!(
                    "Restoring replaces the contents of '{}'; re-run with --yes to confirm",
                    database
                );
            }
            let target = catalog.find_connection(&connection)?;
            println!("🔄 Restoring {} into {} on {}...", file.display(), database, target.name);

            let report = RestoreExecutor::new(resolver)
                .with_temp_root(settings.temp_directory.clone())
                .restore(&file, &target, &database)
                .await
                .context("Restore process failed")?;
            match report.outcome {
                RestoreOutcome::Imported(import) => println!(
                    "✅ Imported {} statement(s) from {} file(s).",
                    import.statements, import.files
                ),
                RestoreOutcome::ToolCompleted { tool } => println!("✅ {} completed.", tool),
            }
        }
        Command::History { clear: true, .. } => {
            catalog.clear_history()?;
            println!("✅ Backup history cleared.");
        }
        Command::History { limit, .. } => {
            let history = catalog.history()?;
            if history.is_empty() {
                println!("No backups recorded yet.");
            }
            for record in history.iter().take(limit) {
                let when = Local
                    .timestamp_millis_opt(record.timestamp)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| record.timestamp.to_string());
                println!(
                    "{}  {:<7}  {}  {}{}",
                    when,
                    format!("{:?}", record.status).to_lowercase(),
                    record.schedule_id,
                    record.backup_file.display(),
                    record
                        .error
                        .as_deref()
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
        }
        Command::Schedules { action } => match action.unwrap_or(ScheduleAction::List) {
            ScheduleAction::List => {
                for schedule in catalog.schedules()? {
                    print_schedule(&schedule);
                }
            }
            ScheduleAction::Enable { schedule_id } => set_enabled(&catalog, &schedule_id, true)?,
            ScheduleAction::Disable { schedule_id } => set_enabled(&catalog, &schedule_id, false)?,
            ScheduleAction::Delete { schedule_id } => {
                if !catalog.delete_schedule(&schedule_id)? {
                    anyhow::bail!("Schedule '{}' not found", schedule_id);
                }
                println!("🗑  Schedule '{}' deleted.", schedule_id);
            }
        },
        Command::Connections { action } => match action {
            ConnectionAction::List => {
                for conn in catalog.connections()? {
                    println!("{}  {}  {}  {}:{}", conn.id, conn.name, conn.kind, conn.host, conn.port);
                }
            }
            ConnectionAction::Test { connection_id } => {
                let conn = catalog.find_connection(&connection_id)?;
                println!("🔄 Connecting to {} ({}:{})...", conn.name, conn.host, conn.port);
                let databases = list_databases(&resolver, &conn)
                    .await
                    .context("Connection test failed")?;
                println!("✅ Connected. {} database(s): {}", databases.len(), databases.join(", "));
            }
        },
    }
    Ok(())
}

fn print_schedule(schedule: &Schedule) {
    let (crons, next) = match CronExpr::for_schedule(schedule) {
        Ok(exprs) => {
            let now = Local::now();
            let next = exprs
                .iter()
                .filter_map(|e| e.next_after(&now))
                .min()
                .filter(|_| schedule.enabled)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            let crons = exprs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            (crons, next)
        }
        Err(e) => (format!("invalid: {}", e), "-".to_string()),
    };
    println!(
        "{}  {}  [{}]  {}  {}  next: {}",
        schedule.id,
        schedule.name,
        if schedule.enabled { "enabled" } else { "disabled" },
        schedule.database,
        crons,
        next
    );
}

/// Saves the flag; a running daemon picks the change up on its next reload.
fn set_enabled(catalog: &Catalog, schedule_id: &str, enabled: bool) -> Result<()> {
    let mut schedule = catalog
        .find_schedule(schedule_id)?
        .with_context(|| format!("Schedule '{}' not found", schedule_id))?;
    schedule.enabled = enabled;
    catalog.save_schedule(&schedule)?;
    println!(
        "✅ Schedule '{}' {}.",
        schedule.name,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
