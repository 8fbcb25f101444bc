// Microfinance Back Office - Core Library
// CSV import, reconciliation, repair and reporting over one SQLite file.
// Exposes all modules for use in the CLI and tests.

pub mod borrower_id;    // Initials-based borrower codes
pub mod config;         // CLI args + mfi.toml
pub mod credit_score;   // Application scoring heuristic
pub mod csv_source;     // Header-mapped CSV rows
pub mod db;             // Schema, records, queries
pub mod error;          // Row-level import errors
pub mod importers;      // One importer per entity
pub mod migration;      // Full run in dependency order
pub mod normalize;      // Dates, amounts, phones, names
pub mod notifications;  // Templates + channel stubs
pub mod reconciliation; // CSV vs database totals
pub mod repair;         // Borrower ids, dates, balances
pub mod reports;        // Portfolio aggregates

// Re-export commonly used types
pub use borrower_id::BorrowerIdGenerator;
pub use credit_score::{CreditRating, CreditRequest, CreditScore};
pub use csv_source::{CsvRow, CsvTable};
pub use db::{
    Borrower, EntityKind, Event, Loan, LoanApplication, LoanStatus, Repayment,
    open_database, setup_database, insert_event, get_events_for_entity,
};
pub use error::{RowError, RowResult};
pub use importers::{
    EntityImporter, ImportOptions, ImportStats, RowOutcome,
    importer_for, run_import,
};
pub use migration::{MigrationOptions, MigrationPlan, MigrationReport, run_migration};
pub use notifications::{Channel, MessageTemplate, NotificationService, Notifier};
pub use reconciliation::{
    ReconciliationEngine, ReconciliationReport, ReconciliationResult,
    Discrepancy, DiscrepancyCategory,
};
pub use reports::{PortfolioSummary, portfolio_summary, overdue_loans};
