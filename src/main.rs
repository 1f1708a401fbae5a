//! pg-schema-migrate - PostgreSQL schema diff and data migration
//!
//! Compares an old and a new database schema, classifies every difference
//! as safe, transformable or breaking, and moves rows across while applying
//! operator-supplied resolutions:
//! - `analyze`: extract both schemas, write the change list and report
//! - `generate-resolutions` / `validate-resolutions`: resolution file workflow
//! - `migrate`: dry-run or live row migration in committed batches
//! - `lookup-inserts`: SQL for lookup values a migration could not resolve

mod analysis;
mod config;
mod connection;
mod db;
mod error;
mod files;
mod introspection;
mod migration;
mod resolution;

use crate::analysis::{MigrationOrchestrator, SchemaChange};
use crate::config::Settings;
use crate::db::DatabasePools;
use crate::error::{validation_error, AppError};
use crate::files::{read_json, read_text, write_json, write_text, OutputPaths};
use crate::migration::missing_lookups;
use crate::migration::{DataMigrator, MigrationRunResult};
use crate::resolution::ResolutionSet;
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Unresolved breaking changes echoed before refusing to migrate
const GATE_DISPLAY_LIMIT: usize = 5;

#[derive(Parser)]
#[command(name = "pg-schema-migrate")]
#[command(about = "Classify PostgreSQL schema differences and migrate data between them")]
#[command(version)]
struct Cli {
    /// Path to the JSON migration config
    #[arg(short, long, default_value = "config/migration-config.json")]
    config: PathBuf,

    /// Directory for reports, change lists and result files
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Prefix for output file names, e.g. `prod` -> `prod_migration_report.txt`
    #[arg(long)]
    prefix: Option<String>,

    /// Log verbosity when RUST_LOG is unset: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the old and new schemas and write the change list and report
    Analyze,

    /// Write a resolution template for the breaking changes in a change list
    GenerateResolutions {
        /// Change list written by `analyze`
        changes_file: PathBuf,
    },

    /// Check a resolution file against a change list
    ValidateResolutions {
        resolutions_file: PathBuf,
        changes_file: PathBuf,
    },

    /// Migrate rows from the old database into the new one
    Migrate {
        /// Write to the new database (default is a dry run)
        #[arg(long)]
        live: bool,

        /// Rows fetched and committed per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Change list [default: <output-dir>/<prefix>migration_changes.json]
        #[arg(long)]
        changes_file: Option<PathBuf>,

        /// Resolution file for the breaking changes
        #[arg(long)]
        resolutions: Option<PathBuf>,
    },

    /// Generate INSERTs for lookup values a migration could not resolve
    LookupInserts {
        /// Migration result file
        result_file: PathBuf,

        /// Output SQL file (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Group values into multi-row INSERT statements
        #[arg(short, long)]
        batched: bool,

        /// Rows per batched INSERT
        #[arg(long, default_value = "100")]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity, cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e.downcast_ref::<AppError>().map_or(1, AppError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let paths = OutputPaths::new(&cli.output_dir, cli.prefix.as_deref());

    match cli.command {
        Commands::Analyze => analyze(&cli.config, &paths).await,
        Commands::GenerateResolutions { changes_file } => {
            generate_resolutions(&changes_file, &paths)
        }
        Commands::ValidateResolutions {
            resolutions_file,
            changes_file,
        } => validate_resolutions(&resolutions_file, &changes_file),
        Commands::Migrate {
            live,
            batch_size,
            changes_file,
            resolutions,
        } => {
            let changes_file = changes_file.unwrap_or_else(|| paths.changes());
            migrate(
                &cli.config,
                &paths,
                !live,
                batch_size,
                &changes_file,
                resolutions.as_deref(),
            )
            .await
        }
        Commands::LookupInserts {
            result_file,
            output,
            batched,
            batch_size,
        } => lookup_inserts(&result_file, output.as_deref(), batched.then_some(batch_size)),
    }
}

/// Initialize tracing; RUST_LOG wins over `--verbosity`
fn init_tracing(verbosity: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pg_schema_migrate={}", verbosity)));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .compact(),
            )
            .init(),
    }
}

fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let settings = Settings::load(path).map_err(AppError::from)?;
    info!("Loaded configuration from {}", path.display());
    Ok(settings)
}

fn load_changes(path: &Path) -> Result<Vec<SchemaChange>, AppError> {
    let changes: Vec<SchemaChange> = read_json(path, "Changes file")?;
    info!("Loaded {} schema change(s) from {}", changes.len(), path.display());
    Ok(changes)
}

async fn analyze(config: &Path, paths: &OutputPaths) -> anyhow::Result<ExitCode> {
    let settings = load_settings(config)?;
    match &settings.tables {
        Some(tables) => info!("Will analyze {} specified tables", tables.len()),
        None => info!("Will analyze ALL tables in the specified schemas"),
    }

    let pools = DatabasePools::connect(&settings.old_database, &settings.new_database).await?;
    let orchestrator = MigrationOrchestrator::new(&settings);
    let outcome = orchestrator.analyze(&pools).await?;

    let report = orchestrator.generate_report(&outcome.changes);
    println!("{}", report);

    write_text(&paths.report(), &report)
        .with_context(|| format!("writing report to {}", paths.report().display()))?;
    write_json(&paths.changes(), &outcome.changes)
        .with_context(|| format!("writing changes to {}", paths.changes().display()))?;

    info!("Report saved to: {}", paths.report().display());
    info!("Changes saved to: {}", paths.changes().display());

    if !outcome.can_auto_migrate {
        warn!(
            "Breaking changes found; generate a resolution template with: generate-resolutions {}",
            paths.changes().display()
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn generate_resolutions(changes_file: &Path, paths: &OutputPaths) -> anyhow::Result<ExitCode> {
    let changes = load_changes(changes_file)?;

    let Some(template) = resolution::generate_template(&changes) else {
        info!("No breaking changes found - no manual resolutions needed");
        return Ok(ExitCode::SUCCESS);
    };

    let output = paths.resolutions();
    write_json(&output, &template)
        .with_context(|| format!("writing resolution template to {}", output.display()))?;

    let breaking = changes.iter().filter(|c| c.is_breaking()).count();
    info!("Generated resolution template for {} breaking change(s)", breaking);
    info!("Template saved to: {}", output.display());
    info!(
        "Edit the file, then check it with: validate-resolutions {} {}",
        output.display(),
        changes_file.display()
    );

    Ok(ExitCode::SUCCESS)
}

fn validate_resolutions(resolutions_file: &Path, changes_file: &Path) -> anyhow::Result<ExitCode> {
    let document: Value = read_json(resolutions_file, "Resolutions file")?;
    let changes = load_changes(changes_file)?;

    let report = resolution::validate(&document, &changes);
    println!("Breaking changes:     {}", report.breaking_changes);
    println!("Resolutions provided: {}", report.resolutions_provided);

    if report.is_complete() {
        println!("All breaking changes have valid resolutions");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} issue(s):", report.issues.len());
    for issue in &report.issues {
        println!("  - {}", issue);
    }
    Ok(ExitCode::FAILURE)
}

async fn migrate(
    config: &Path,
    paths: &OutputPaths,
    dry_run: bool,
    batch_size: Option<usize>,
    changes_file: &Path,
    resolutions_file: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let mut settings = load_settings(config)?;
    if let Some(size) = batch_size {
        if size == 0 {
            return Err(validation_error("--batch-size must be greater than 0").into());
        }
        settings.migration.batch_size = size;
    }

    let changes = load_changes(changes_file)?;
    let resolutions = match resolutions_file {
        Some(path) => {
            info!("Loading manual resolutions from {}", path.display());
            ResolutionSet::from_json_str(&read_text(path, "Resolutions file")?)?
        }
        None => ResolutionSet::default(),
    };

    let unresolved = resolutions.unresolved_breaking(&changes);
    if !unresolved.is_empty() {
        error!(
            "Found {} breaking change(s) that require manual intervention:",
            unresolved.len()
        );
        for change in unresolved.iter().take(GATE_DISPLAY_LIMIT) {
            error!("  - [{}] {}", change.table, change.description);
        }
        error!(
            "Generate a resolution template with: generate-resolutions {}",
            changes_file.display()
        );
        return Err(AppError::UnresolvedBreakingChanges {
            count: unresolved.len(),
        }
        .into());
    }

    let pools = DatabasePools::connect(&settings.old_database, &settings.new_database).await?;
    let migrator = DataMigrator::new(&settings, &pools, &changes, &resolutions);
    let result = migrator.migrate_all(dry_run).await?;

    let result_file = paths.join(&result.file_name(paths.prefix()));
    write_json(&result_file, &result)
        .with_context(|| format!("writing migration result to {}", result_file.display()))?;
    info!("Results saved to: {}", result_file.display());

    let missing = missing_lookups::collect_missing(&result);
    if !missing.is_empty() {
        warn!(
            "{} lookup value(s) were missing; generate INSERTs with: lookup-inserts {}",
            missing_lookups::total_missing(&missing),
            result_file.display()
        );
    }
    if dry_run {
        info!("To execute the actual migration, run with --live");
    }

    Ok(ExitCode::SUCCESS)
}

fn lookup_inserts(
    result_file: &Path,
    output: Option<&Path>,
    batch_size: Option<usize>,
) -> anyhow::Result<ExitCode> {
    let result: MigrationRunResult = read_json(result_file, "Result file")?;
    let missing = missing_lookups::collect_missing(&result);

    if missing.is_empty() {
        println!("No lookup table errors found - no SQL needed");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "Found {} unique missing value(s) across {} lookup table(s):",
        missing_lookups::total_missing(&missing),
        missing.len()
    );
    for (target, values) in &missing {
        println!("   - {}: {} missing values", target.table, values.len());
    }

    let sql = missing_lookups::generate_inserts(&missing, batch_size);
    match output {
        Some(path) => {
            write_text(path, &sql)
                .with_context(|| format!("writing SQL to {}", path.display()))?;
            println!("SQL written to: {}", path.display());
        }
        None => {
            println!("Generated SQL:");
            println!("{}", "-".repeat(60));
            println!("{}", sql);
        }
    }

    Ok(ExitCode::SUCCESS)
}
