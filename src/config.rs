use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::db::EntityKind;
use crate::importers::ImportOptions;
use crate::migration::MigrationPlan;

#[derive(Parser, Debug)]
#[command(name = "mfi", about = "Microfinance back office - CSV import, reconciliation and reports")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "mfi.toml")]
    pub config: String,

    /// SQLite database file (overrides config file)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import every configured CSV in dependency order
    Migrate {
        /// Delete all existing rows first
        #[arg(long)]
        fresh: bool,
    },

    /// Import one CSV file for one entity
    Import { entity: String, file: PathBuf },

    /// Compare a CSV file's count and totals with the database
    Reconcile { entity: String, file: PathBuf },

    /// Fix drifted data
    Repair {
        #[command(subcommand)]
        task: RepairTask,
    },

    /// Portfolio report
    Report {
        /// Reference date for overdue loans (default: today)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Score a hypothetical loan request
    Score {
        #[arg(long)]
        amount: f64,

        #[arg(long, default_value = "")]
        purpose: String,

        #[arg(long, default_value_t = 12)]
        term: u32,
    },

    /// Send notifications
    Notify {
        #[command(subcommand)]
        task: NotifyTask,
    },
}

#[derive(Subcommand, Debug)]
pub enum RepairTask {
    /// Reassign borrower codes from name initials
    BorrowerIds,

    /// Fill missing loan and repayment dates
    BackfillDates {
        /// Used when no application date is available (default: today)
        #[arg(long)]
        default_date: Option<NaiveDate>,
    },

    /// Rebuild loan and savings balances from transactions
    Balances,
}

#[derive(Subcommand, Debug)]
pub enum NotifyTask {
    /// Overdue notice for every overdue loan
    Overdue {
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// whatsapp, sms or email (overrides config file)
        #[arg(long)]
        channel: Option<String>,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Directory the per-entity file names are relative to
    #[serde(default = "default_import_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_true")]
    pub fallback_to_first_record: bool,

    #[serde(default)]
    pub default_interest_rate: f64,

    #[serde(default = "default_term_months")]
    pub default_term_months: u32,

    #[serde(default)]
    pub files: ImportFiles,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportFiles {
    #[serde(default = "default_borrowers_file")]
    pub borrowers: String,
    #[serde(default = "default_loans_file")]
    pub loans: String,
    #[serde(default = "default_repayments_file")]
    pub repayments: String,
    #[serde(default = "default_savings_file")]
    pub savings: String,
    #[serde(default = "default_expenses_file")]
    pub expenses: String,
    #[serde(default = "default_applications_file")]
    pub applications: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_database() -> DatabaseConfig {
    DatabaseConfig {
        path: default_database_path(),
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("mfi.db")
}

fn default_import_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

fn default_term_months() -> u32 {
    12
}

fn default_borrowers_file() -> String {
    "borrowers.csv".to_string()
}

fn default_loans_file() -> String {
    "loans.csv".to_string()
}

fn default_repayments_file() -> String {
    "repayments.csv".to_string()
}

fn default_savings_file() -> String {
    "savings.csv".to_string()
}

fn default_expenses_file() -> String {
    "expenses.csv".to_string()
}

fn default_applications_file() -> String {
    "loan_applications.csv".to_string()
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel() -> String {
    "sms".to_string()
}

impl Default for ImportFiles {
    fn default() -> Self {
        ImportFiles {
            borrowers: default_borrowers_file(),
            loans: default_loans_file(),
            repayments: default_repayments_file(),
            savings: default_savings_file(),
            expenses: default_expenses_file(),
            applications: default_applications_file(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            dir: default_import_dir(),
            fallback_to_first_record: true,
            default_interest_rate: 0.0,
            default_term_months: default_term_months(),
            files: ImportFiles::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            channel: default_channel(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: default_database(),
            import: ImportConfig::default(),
            logging: default_logging(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = Self::from_file(Path::new(&cli.config));

        // CLI overrides
        if let Some(ref path) = cli.database {
            config.database.path = path.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }

    /// Missing file → defaults; unparsable file → warning + defaults
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            fallback_to_first_record: self.import.fallback_to_first_record,
            default_interest_rate: self.import.default_interest_rate,
            default_term_months: self.import.default_term_months,
            ..ImportOptions::default()
        }
    }

    pub fn migration_plan(&self) -> MigrationPlan {
        let files = &self.import.files;
        let names = [
            (EntityKind::Borrowers, files.borrowers.clone()),
            (EntityKind::Loans, files.loans.clone()),
            (EntityKind::Repayments, files.repayments.clone()),
            (EntityKind::Savings, files.savings.clone()),
            (EntityKind::Expenses, files.expenses.clone()),
            (EntityKind::Applications, files.applications.clone()),
        ];
        MigrationPlan::from_dir(&self.import.dir, &names)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = Config::from_file(Path::new("/nonexistent/mfi.toml"));
        assert_eq!(config.database.path, PathBuf::from("mfi.db"));
        assert!(config.import.fallback_to_first_record);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.notifications.channel, "sms");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [import]
            dir = "/srv/exports"
            fallback_to_first_record = false
            default_interest_rate = 15.0

            [import.files]
            loans = "Loans 2024.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.import.default_term_months, 12);
        assert_eq!(config.import.files.borrowers, "borrowers.csv");

        let options = config.import_options();
        assert!(!options.fallback_to_first_record);
        assert_eq!(options.default_interest_rate, 15.0);

        let plan = config.migration_plan();
        assert_eq!(
            plan.file_for(EntityKind::Loans),
            Some(Path::new("/srv/exports/Loans 2024.csv"))
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mfi.toml");
        std::fs::write(&path, "[database]\npath = \"from_file.db\"\n[logging]\nlevel = \"warn\"\n").unwrap();

        let cli = CliArgs::parse_from([
            "mfi",
            "--config",
            path.to_str().unwrap(),
            "--database",
            "override.db",
            "score",
            "--amount",
            "100000",
        ]);
        let config = Config::load(&cli);

        assert_eq!(config.database.path, PathBuf::from("override.db"));
        assert_eq!(config.logging.level, "warn");
        assert!(matches!(cli.command, Command::Score { term: 12, .. }));
    }

    #[test]
    fn test_repair_subcommand_parses_date() {
        let cli = CliArgs::parse_from(["mfi", "repair", "backfill-dates", "--default-date", "2024-01-31"]);
        match cli.command {
            Command::Repair {
                task: RepairTask::BackfillDates { default_date },
            } => assert_eq!(default_date, NaiveDate::from_ymd_opt(2024, 1, 31)),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
