//! Colored terminal rendering of migration events

use colored::Colorize;
use schemaguard::migration::{MigrationEvent, Reporter};

/// Prints progress to stdout and failures to stderr
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    /// With `quiet`, only failures are printed
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn say(&self, line: colored::ColoredString) {
        if !self.quiet {
            println!("{line}");
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: &MigrationEvent<'_>) {
        match *event {
            MigrationEvent::VersionsCompared { database, schema } => {
                self.say(format!("Database: v{database} => Schema: v{schema}").blue());
            }
            MigrationEvent::UpToDate { .. } => {
                self.say("No migration operation will be performed. Check settings.".yellow());
            }
            MigrationEvent::MigrationIncluded { .. } => {}
            MigrationEvent::MigrationSkipped { path, .. } => {
                self.say(format!("Skipping migration directory: {}", path.display()).yellow());
            }
            MigrationEvent::InvalidMigrationDirectory { path } => {
                eprintln!("{}", format!("Invalid migration directory: {}", path.display()).red());
            }
            MigrationEvent::EnteringDirectory { path } => {
                self.say(format!("Running folder: {}", path.display()).cyan());
            }
            MigrationEvent::ExecutingFile { path } => {
                self.say(format!("Executing file: {}", path.display()).white());
            }
            MigrationEvent::ExecutionFailed { detail, .. } => {
                if let Some(detail) = detail {
                    eprintln!("{}", format!("DETAILS: {detail}").yellow());
                }
            }
            MigrationEvent::Canceled => eprintln!("{}", "Aborting...".yellow()),
            MigrationEvent::RolledBack => {
                self.say("INFO: Successfully performed rollback on transaction".blue());
            }
            MigrationEvent::RollbackFailed { error } => {
                eprintln!("{}", error.to_string().yellow());
                eprintln!("{}", "ERROR: Unexpected error rolling back transaction".red());
            }
            MigrationEvent::Committed => {}
            MigrationEvent::VersionRecorded { version } => {
                self.say(format!("Updated db_version to {version}").blue());
            }
        }
    }
}
