//! Schemaguard Migration CLI Tool
//!
//! Brings a PostgreSQL database to the version declared by a schema root.
//! Exit status is 0 on success or when already up to date, 1 on failure and
//! 130 when the run was canceled.

mod console;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::ConsoleReporter;
use schemaguard::migration::{CancellationToken, Migrator, RunError, RunOutcome};
use schemaguard::{connect, validate_connection_string, MigrateConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "schemaguard-migrate")]
#[command(about = "Run PostgreSQL database migrations based on a versioned schema directory")]
#[command(version)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(short = 'd', long, visible_alias = "database")]
    database_url: Option<String>,

    /// Root schema directory (holds db.version)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Configuration file (default: config/config.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Apply the schema (default)
    Up,

    /// Show database and schema versions
    Status,

    /// Dry run - list the files a migration would execute
    Plan,

    /// Print the version string
    Version,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(&cli)))
        .init();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("Error: {e:#}").red());
            EXIT_FAILURE
        }
    };
    process::exit(code);
}

/// Default filter when `RUST_LOG` is unset
fn log_level(cli: &Cli) -> &'static str {
    if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let command = cli.command.unwrap_or(Commands::Up);
    if command == Commands::Version {
        println!("v{}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let config = match &cli.config {
        Some(path) => MigrateConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MigrateConfig::load().context("loading configuration")?,
    };

    let database_url = database_url(
        cli.database_url.clone(),
        config.database_url.clone(),
        |key| std::env::var(key).ok(),
    )
    .ok_or_else(|| {
        anyhow!(
            "Database URL not provided. Use --database-url or set SCHEMAGUARD_DATABASE_URL or DATABASE_URL environment variable."
        )
    })?;
    validate_connection_string(&database_url)?;

    let source = cli.source.clone().unwrap_or(config.source);
    log::debug!("Schema root: {}", source.display());

    let conn = connect(&database_url).context("connecting to database")?;
    let migrator = Migrator::new(&source)
        .with_layout(config.layout)
        .with_routines(config.routines)
        .with_reporter(Arc::new(ConsoleReporter::new(cli.quiet)));

    let token = migrator.cancellation_token();
    ctrlc::set_handler(move || {
        if !on_signal(&token) {
            process::exit(EXIT_CANCELED);
        }
    })
    .context("installing signal handler")?;

    let result = match command {
        Commands::Up => migrator.run(&conn).map(|outcome| report_outcome(&outcome, cli.quiet)),
        Commands::Status => migrator.status(&conn).map(|status| {
            println!("Database version: v{}", status.database);
            println!("Schema version:   v{}", status.schema);
            if status.pending {
                println!("{}", "Migration pending".yellow());
            } else {
                println!("{}", "Up to date".green());
            }
        }),
        Commands::Plan => migrator.plan(&conn).map(|plan| {
            if plan.files.is_empty() {
                println!("No files would be executed");
            } else {
                println!(
                    "Would migrate v{} => v{} executing {} file(s):",
                    plan.status.database,
                    plan.status.schema,
                    plan.files.len()
                );
                for (i, file) in plan.files.iter().enumerate() {
                    println!("  {}. {}", i + 1, file.display());
                }
            }
        }),
        Commands::Version => Ok(()),
    };

    Ok(match result {
        Ok(()) => 0,
        Err(e) => exit_code(&e),
    })
}

fn report_outcome(outcome: &RunOutcome, quiet: bool) {
    if quiet {
        return;
    }
    if let RunOutcome::Applied { files, .. } = outcome {
        println!(
            "{}",
            format!("Migration finished successfully! ({} file(s))", files.len()).green()
        );
    }
}

/// Report a failed run and pick the exit status
fn exit_code(error: &RunError) -> i32 {
    if error.is_canceled() {
        eprintln!("{}", format!("Migration canceled while {}", error.phase).yellow());
        return EXIT_CANCELED;
    }
    eprintln!("{}", error.to_string().red());
    EXIT_FAILURE
}

/// Cancel the run on SIGINT/SIGTERM
///
/// The run stops at its next checkpoint and rolls back. Returns `false` when
/// the token was already canceled, in which case the caller exits at once.
fn on_signal(token: &CancellationToken) -> bool {
    if token.is_canceled() {
        return false;
    }
    eprintln!("{}", "Received signal, stopping at the next checkpoint".yellow());
    token.cancel();
    true
}

/// Flag, then environment, then configuration file
fn database_url(
    flag: Option<String>,
    configured: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    flag.or_else(|| env("SCHEMAGUARD_DATABASE_URL"))
        .or_else(|| env("DATABASE_URL"))
        .or(configured)
}
