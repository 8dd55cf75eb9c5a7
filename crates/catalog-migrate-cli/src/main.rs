//! catalog-migrate CLI - content catalog migration runs.

use catalog_migrate::coordinator::{DomainOutcome, RunResult, RunStatus};
use catalog_migrate::tracking::TrackingFilter;
use catalog_migrate::{
    Config, LockPolicy, MigrateError, MigratorRegistry, RunCoordinator, RunRequest, Stores,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "catalog-migrate")]
#[command(about = "Migrate content between catalog systems, domain by domain")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a migration plan
    Run {
        /// Plan id (file name without .yaml in the plans directory)
        plan: String,

        /// Convert and validate entities without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Override stage 2 worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Wait for a running migration instead of failing
        #[arg(long)]
        wait_for_lock: bool,
    },

    /// Check a migration plan without migrating anything
    Validate {
        /// Plan id
        plan: String,
    },

    /// Show migration progress from the tracking store
    Status {
        /// Only these source content types (repeatable)
        #[arg(long = "source-type")]
        source_types: Vec<String>,

        /// List matching records instead of the summary
        #[arg(long)]
        list: bool,

        /// With --list: only unmigrated records
        #[arg(long)]
        pending: bool,

        /// With --list: maximum records shown
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// List registered domains and whether they are installed
    Domains,

    /// List available migration plans
    Plans,

    /// Create tracking and target tables
    InitSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!(
        "Loaded configuration from {:?} (hash {})",
        cli.config,
        &config.hash()[..12]
    );

    let registry = Arc::new(MigratorRegistry::with_builtins());

    match cli.command {
        Commands::Run {
            plan,
            dry_run,
            workers,
            wait_for_lock,
        } => {
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if wait_for_lock {
                config.migration.lock.policy = LockPolicy::Wait;
            }
            config.validate()?;

            let cancel_token = setup_signal_handler()?;
            let stores = Stores::from_config(&config).await?;
            let coordinator = RunCoordinator::new(registry, stores, config.migration);

            let mut request = RunRequest::new(plan);
            if dry_run {
                request = request.dry_run();
            }
            let result = coordinator.run_with_cancel(request, cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result);
            }
            exit_for(&result)
        }

        Commands::Validate { plan } => {
            let stores = Stores::from_config(&config).await?;
            let coordinator = RunCoordinator::new(registry, stores, config.migration);
            let result = coordinator
                .run(RunRequest::new(plan).validate_only())
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else if let Some(report) = &result.validation {
                println!("\nPlan {} ({}):", result.plan_id, result.status);
                for problem in &report.plan_problems {
                    println!("  - {}", problem);
                }
                for entry in &report.entries {
                    let mark = if entry.is_ok() { "OK" } else { "FAILED" };
                    println!(
                        "  {:<12} {:<7} registered={} installed={}",
                        entry.domain, mark, entry.registered, entry.installed
                    );
                    for problem in &entry.problems {
                        println!("    - {}", problem);
                    }
                }
            }

            match &result.validation {
                Some(report) if !report.is_ok() => {
                    Err(MigrateError::ValidationFailed(report.problems()))
                }
                _ => Ok(ExitCode::SUCCESS),
            }
        }

        Commands::Status {
            source_types,
            list,
            pending,
            limit,
        } => {
            let stores = Stores::from_config(&config).await?;

            if list {
                let mut filter = TrackingFilter::new().with_limit(limit);
                filter.source_types = source_types;
                if pending {
                    filter = filter.with_migrated(false);
                }
                let records = stores.tracking.query(&filter).await?;

                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    for record in &records {
                        println!(
                            "{:<24} {:<36} {:<8} {}",
                            record.source_type,
                            record.source_id,
                            record.domain,
                            record
                                .target_ref
                                .map(|r| r.to_string())
                                .unwrap_or_else(|| "-".to_string())
                        );
                    }
                }
                return Ok(ExitCode::SUCCESS);
            }

            let mut summary = stores.tracking.summary().await?;
            if !source_types.is_empty() {
                summary.by_type.retain(|t, _| source_types.contains(t));
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\nTracking ({}):", stores.tracking.backend_type());
                for (source_type, progress) in &summary.by_type {
                    println!(
                        "  {:<24} migrated {:>8}  pending {:>8}",
                        source_type, progress.migrated, progress.unmigrated
                    );
                }
                println!(
                    "  Total: {} migrated, {} pending",
                    summary.migrated(),
                    summary.unmigrated()
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Domains => {
            let stores = Stores::from_config(&config).await?;
            let mut rows = Vec::new();
            for name in registry.domain_names() {
                let migrator = registry.lookup(name)?;
                let installed = registry.is_installed(name, stores.source.as_ref()).await?;
                rows.push(serde_json::json!({
                    "domain": name,
                    "target_plugin": migrator.target_plugin(),
                    "source_collection": migrator.source_collection(),
                    "installed": installed,
                    "content_types": migrator.content_type_map().keys().collect::<Vec<_>>(),
                    "importer_types": migrator.importer_map().keys().collect::<Vec<_>>(),
                }));
            }

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    println!(
                        "{:<10} -> {:<10} installed={:<5} types={}",
                        row["domain"].as_str().unwrap_or_default(),
                        row["target_plugin"].as_str().unwrap_or_default(),
                        row["installed"],
                        row["content_types"]
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Plans => {
            let stores = Stores::from_config(&config).await?;
            let ids = stores.plans.list().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                for id in ids {
                    println!("{}", id);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::InitSchema => {
            let stores = Stores::from_config(&config).await?;
            stores.init_schema().await?;
            println!(
                "Schema ready (tracking: {}, target: {})",
                stores.tracking.backend_type(),
                stores.target.backend_type()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_result(result: &RunResult) {
    let heading = if result.dry_run {
        "Dry run finished"
    } else {
        "Migration finished"
    };
    println!("\n{}: {}", heading, result.status);
    println!("  Run ID: {}", result.run_id);
    println!("  Plan: {} ({})", result.plan_id, &result.plan_digest[..12]);
    println!("  Duration: {:.2}s", result.duration_seconds);
    for domain in &result.domains {
        print_domain(domain, result.dry_run);
    }
    let errors: Vec<_> = result.record_errors().collect();
    if !errors.is_empty() {
        println!("  Record errors: {}", errors.len());
        for err in errors.iter().take(20) {
            println!(
                "    {}:{} [{:?}] {}",
                err.source_type, err.source_id, err.kind, err.message
            );
        }
    }
}

fn print_domain(domain: &DomainOutcome, dry_run: bool) {
    let count = if dry_run {
        format!("validated {}", domain.validated)
    } else {
        format!("migrated {}", domain.migrated)
    };
    println!(
        "  {:<10} {:?}: {}, skipped {}, failed {}, importers {}/{}",
        domain.domain,
        domain.status,
        count,
        domain.skipped,
        domain.failed,
        domain.importers_migrated,
        domain.importers_migrated + domain.importers_failed
    );
    if let Some(err) = &domain.error {
        println!("    {:?}: {}", err.kind, err.message);
    }
}

fn exit_for(result: &RunResult) -> Result<ExitCode, MigrateError> {
    match result.status {
        RunStatus::Completed | RunStatus::Validated => Ok(ExitCode::SUCCESS),
        RunStatus::Cancelled => Err(MigrateError::Cancelled),
        RunStatus::ValidationFailed => Ok(ExitCode::from(3)),
        RunStatus::Partial | RunStatus::Failed => Ok(ExitCode::from(1)),
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
///
/// The run stops between records; migrated records stay migrated.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Stopping after in-flight records..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Stopping after in-flight records..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after in-flight records...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
