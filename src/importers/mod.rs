// Entity Importers
//
// One importer per entity. Each maps a header-aliased CSV row onto
// create/update calls. The shared driver (`run_import`) owns the per-row
// policy: catch, log, count, continue. Nothing is rolled back.

pub mod applications;
pub mod borrowers;
pub mod expenses;
pub mod loans;
pub mod repayments;
pub mod savings;

pub use applications::ApplicationImporter;
pub use borrowers::BorrowerImporter;
pub use expenses::ExpenseImporter;
pub use loans::LoanImporter;
pub use repayments::RepaymentImporter;
pub use savings::SavingsImporter;

use crate::csv_source::{CsvRow, CsvTable};
use crate::db::{self, Borrower, EntityKind, Event, Loan};
use crate::error::{RowError, RowResult};
use crate::normalize::split_name;
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// SHARED HEADER ALIASES
// ============================================================================

pub const BORROWER_CODE_ALIASES: &[&str] = &[
    "Borrower ID",
    "BorrowerID",
    "Borrower Id",
    "borrower_id",
    "Borrower Code",
    "Client ID",
    "Member ID",
];

pub const BORROWER_NAME_ALIASES: &[&str] = &[
    "Borrower Name",
    "Borrower",
    "Name",
    "Full Name",
    "Client Name",
    "Member Name",
];

pub const LOAN_NUMBER_ALIASES: &[&str] = &[
    "Loan ID",
    "Loan Number",
    "Loan No",
    "LoanID",
    "loan_id",
    "Loan Ref",
];

pub const TERM_ALIASES: &[&str] = &[
    "Term",
    "Loan Term",
    "Term (Months)",
    "Duration",
    "Period",
    "term_months",
];

pub const PURPOSE_ALIASES: &[&str] = &["Purpose", "Loan Purpose", "purpose"];

// ============================================================================
// OPTIONS, OUTCOMES, STATS
// ============================================================================

/// Knobs shared by every importer (filled from the `[import]` config table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Attach rows with an unresolvable borrower/loan to the first record
    pub fallback_to_first_record: bool,
    pub default_interest_rate: f64,
    pub default_term_months: u32,
    /// Recorded as `actor` on audit events
    pub actor: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            fallback_to_first_record: true,
            default_interest_rate: 0.0,
            default_term_months: 12,
            actor: "csv_importer".to_string(),
        }
    }
}

/// What happened to one row. The string is the entity key used in logs.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Inserted(String),
    Updated(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFailure {
    pub line_number: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStats {
    pub entity: EntityKind,
    pub source_file: String,
    pub total_rows: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
}

impl ImportStats {
    pub fn new(entity: EntityKind, source_file: &str) -> Self {
        ImportStats {
            entity,
            source_file: source_file.to_string(),
            total_rows: 0,
            imported: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} from {}: {} rows → {} imported, {} updated, {} skipped, {} failed",
            self.entity.name(),
            self.source_file,
            self.total_rows,
            self.imported,
            self.updated,
            self.skipped,
            self.failed
        )
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

// ============================================================================
// IMPORTER TRAIT
// ============================================================================

/// One entity's row mapping. Adding an entity = implementing this trait.
pub trait EntityImporter {
    fn entity(&self) -> EntityKind;

    /// Headers that carry the row's money amount (used by reconciliation)
    fn amount_aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome>;
}

/// Build the importer for an entity
pub fn importer_for(entity: EntityKind, options: &ImportOptions) -> Box<dyn EntityImporter> {
    match entity {
        EntityKind::Borrowers => Box::new(BorrowerImporter::new()),
        EntityKind::Loans => Box::new(LoanImporter::new(options.clone())),
        EntityKind::Repayments => Box::new(RepaymentImporter::new(options.clone())),
        EntityKind::Savings => Box::new(SavingsImporter::new(options.clone())),
        EntityKind::Expenses => Box::new(ExpenseImporter::new()),
        EntityKind::Applications => Box::new(ApplicationImporter::new(options.clone())),
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Feed every row of `table` to `importer`. Row errors are logged and
/// counted; only audit-log failures abort.
pub fn run_import(
    conn: &Connection,
    importer: &mut dyn EntityImporter,
    table: &CsvTable,
    options: &ImportOptions,
) -> Result<ImportStats> {
    let entity = importer.entity();
    let mut stats = ImportStats::new(entity, &table.source_file);
    stats.total_rows = table.rows.len() + table.malformed.len();

    let _span = tracing::info_span!("import", entity = entity.name(), file = %table.source_file).entered();

    for bad in &table.malformed {
        let err = RowError::Malformed(bad.message.clone());
        tracing::error!(line = bad.line_number, "❌ {}", err);
        stats.failed += 1;
        stats.failures.push(RowFailure {
            line_number: bad.line_number,
            message: err.to_string(),
        });
    }

    for row in &table.rows {
        match importer.import_row(conn, row) {
            Ok(RowOutcome::Inserted(key)) => {
                tracing::info!(line = row.line_number, key = %key, "✅ imported");
                stats.imported += 1;

                let event = Event::new(
                    "row_imported",
                    entity.name(),
                    &key,
                    serde_json::json!({
                        "source_file": table.source_file,
                        "line": row.line_number,
                    }),
                    &options.actor,
                );
                db::insert_event(conn, &event)?;
            }
            Ok(RowOutcome::Updated(key)) => {
                tracing::info!(line = row.line_number, key = %key, "✅ updated");
                stats.updated += 1;
            }
            Ok(RowOutcome::Skipped(reason)) => {
                tracing::warn!(line = row.line_number, "⚠️ skipped: {}", reason);
                stats.skipped += 1;
            }
            Err(err) => {
                tracing::error!(line = row.line_number, "❌ {}", err);
                stats.failed += 1;
                stats.failures.push(RowFailure {
                    line_number: row.line_number,
                    message: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        imported = stats.imported,
        updated = stats.updated,
        skipped = stats.skipped,
        failed = stats.failed,
        "import finished"
    );

    Ok(stats)
}

// ============================================================================
// FOREIGN-KEY RESOLUTION
// ============================================================================

/// Borrower for a child row: code → full name → first borrower (if allowed)
pub fn resolve_borrower(conn: &Connection, row: &CsvRow, allow_fallback: bool) -> RowResult<Borrower> {
    if let Some(b) = lookup_borrower(conn, row)? {
        return Ok(b);
    }

    let label = row
        .get_any(BORROWER_CODE_ALIASES)
        .or_else(|| row.get_any(BORROWER_NAME_ALIASES))
        .unwrap_or("<none>")
        .to_string();

    if !allow_fallback {
        return Err(RowError::UnknownBorrower(label));
    }

    match db::first_borrower(conn)? {
        Some(b) => {
            tracing::warn!(
                line = row.line_number,
                wanted = %label,
                used = %b.borrower_code,
                "⚠️ borrower not found, falling back to first borrower"
            );
            Ok(b)
        }
        None => Err(RowError::NoBorrowers),
    }
}

/// Strict lookup without fallback
fn lookup_borrower(conn: &Connection, row: &CsvRow) -> RowResult<Option<Borrower>> {
    if let Some(code) = row.get_any(BORROWER_CODE_ALIASES) {
        if let Some(b) = db::find_borrower_by_code(conn, code)? {
            return Ok(Some(b));
        }
    }

    if let Some(name) = row.get_any(BORROWER_NAME_ALIASES) {
        let (first, last) = split_name(name);
        if let Some(b) = db::find_borrower_by_name(conn, &first, &last)? {
            return Ok(Some(b));
        }
    }

    Ok(None)
}

/// Loan for a repayment row: loan number → borrower's latest loan → first loan
pub fn resolve_loan(conn: &Connection, row: &CsvRow, allow_fallback: bool) -> RowResult<Loan> {
    if let Some(number) = row.get_any(LOAN_NUMBER_ALIASES) {
        if let Some(loan) = db::find_loan_by_number(conn, number)? {
            return Ok(loan);
        }
    }

    if let Some(borrower) = lookup_borrower(conn, row)? {
        if let Some(loan) = db::latest_loan_for_borrower(conn, borrower.id)? {
            return Ok(loan);
        }
    }

    let label = row
        .get_any(LOAN_NUMBER_ALIASES)
        .or_else(|| row.get_any(BORROWER_CODE_ALIASES))
        .or_else(|| row.get_any(BORROWER_NAME_ALIASES))
        .unwrap_or("<none>")
        .to_string();

    if !allow_fallback {
        return Err(RowError::UnknownLoan(label));
    }

    match db::first_loan(conn)? {
        Some(loan) => {
            tracing::warn!(
                line = row.line_number,
                wanted = %label,
                used = %loan.loan_number,
                "⚠️ loan not found, falling back to first loan"
            );
            Ok(loan)
        }
        None => Err(RowError::NoLoans),
    }
}

/// Term in whole months from "6", "6 months", "12 Months"
pub fn parse_term(row: &CsvRow, default: u32) -> u32 {
    row.get_any(TERM_ALIASES)
        .and_then(crate::normalize::parse_amount_opt)
        .map(|t| t.round().max(0.0) as u32)
        .filter(|t| *t > 0)
        .unwrap_or(default)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    struct CountingImporter;

    impl EntityImporter for CountingImporter {
        fn entity(&self) -> EntityKind {
            EntityKind::Expenses
        }

        fn import_row(&mut self, _conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
            match row.get("Action") {
                Some("insert") => Ok(RowOutcome::Inserted(format!("row{}", row.line_number))),
                Some("update") => Ok(RowOutcome::Updated("x".to_string())),
                Some("skip") => Ok(RowOutcome::Skipped("asked to".to_string())),
                other => Err(RowError::InvalidValue {
                    field: "Action",
                    value: other.unwrap_or("").to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_driver_counts_and_continues_after_failures() {
        let conn = test_db();
        let t = table("Action\ninsert\nfail\nupdate\nskip\ninsert\n");

        let stats = run_import(&conn, &mut CountingImporter, &t, &ImportOptions::default()).unwrap();

        assert_eq!(stats.total_rows, 5);
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures[0].line_number, 3);
        assert!(!stats.is_clean());

        // one audit event per inserted row
        assert_eq!(db::count_rows(&conn, "events").unwrap(), 2);
    }

    #[test]
    fn test_driver_counts_malformed_records_as_failures() {
        let conn = test_db();
        let mut bytes = b"Action\ninsert\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"update\n");
        let t = CsvTable::from_reader("actions.csv", bytes.as_slice()).unwrap();

        let stats = run_import(&conn, &mut CountingImporter, &t, &ImportOptions::default()).unwrap();

        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.imported, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures[0].line_number, 3);
        assert!(stats.failures[0].message.starts_with("malformed CSV record"));
    }

    #[test]
    fn test_resolve_borrower_by_code_then_name() {
        let conn = test_db();
        let jane = seed_borrower(&conn, "JD001", "Jane", "Doe");
        let john = seed_borrower(&conn, "JO001", "John", "Okello");

        let t = table("Borrower ID,Name\nJD001,\n,John Okello\n");
        assert_eq!(resolve_borrower(&conn, &t.rows[0], false).unwrap().id, jane);
        assert_eq!(resolve_borrower(&conn, &t.rows[1], false).unwrap().id, john);
    }

    #[test]
    fn test_resolve_borrower_fallback() {
        let conn = test_db();
        let t = table("Name\nNobody Known\n");

        assert!(matches!(
            resolve_borrower(&conn, &t.rows[0], true),
            Err(RowError::NoBorrowers)
        ));

        let first = seed_borrower(&conn, "JD001", "Jane", "Doe");
        seed_borrower(&conn, "AB001", "Anna", "Bbosa");

        assert_eq!(resolve_borrower(&conn, &t.rows[0], true).unwrap().id, first);
        assert!(matches!(
            resolve_borrower(&conn, &t.rows[0], false),
            Err(RowError::UnknownBorrower(_))
        ));
    }

    #[test]
    fn test_resolve_loan_through_borrower() {
        let conn = test_db();
        let jane = seed_borrower(&conn, "JD001", "Jane", "Doe");
        let other = seed_borrower(&conn, "AB001", "Anna", "Bbosa");
        seed_loan(&conn, "LN00001", other, 50_000.0);
        let jane_loan = seed_loan(&conn, "LN00002", jane, 80_000.0);

        let t = table("Loan ID,Borrower ID\nLN00001,\n,JD001\nLN99999,\n");

        assert_eq!(resolve_loan(&conn, &t.rows[0], false).unwrap().loan_number, "LN00001");
        assert_eq!(resolve_loan(&conn, &t.rows[1], false).unwrap().id, jane_loan);
        assert!(resolve_loan(&conn, &t.rows[2], false).is_err());
        assert_eq!(resolve_loan(&conn, &t.rows[2], true).unwrap().loan_number, "LN00001");
    }

    #[test]
    fn test_parse_term() {
        let t = table("Term\n6 months\n\nabc\n");
        assert_eq!(parse_term(&t.rows[0], 12), 6);
        assert_eq!(parse_term(&t.rows[1], 12), 12);
    }
}
