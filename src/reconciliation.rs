// ⚖️ Reconciliation Engine - does the database hold what the CSV says?
//
// For one entity and one source file:
//   CSV row count     == stored row count
//   CSV amount total  == stored amount total   (within tolerance)
//
// Amount differences below the major threshold are reported as minor
// (rounding in the spreadsheet); anything else, or any count mismatch,
// is major and usually means rows were skipped or imported twice.

use crate::csv_source::CsvTable;
use crate::db::{self, EntityKind};
use crate::importers::{importer_for, ImportOptions};
use crate::normalize::parse_amount;
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Counts match and totals agree within tolerance
    Balanced { row_count: i64, amount_total: f64 },

    /// Counts match, totals off by less than the major threshold
    MinorDiscrepancy {
        expected_total: f64,
        actual_total: f64,
        difference: f64,
        tolerance: f64,
    },

    /// Count mismatch, or totals off by the major threshold or more
    MajorDiscrepancy {
        expected_total: f64,
        actual_total: f64,
        difference: f64,
        missing_rows: i64,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn has_discrepancy(&self) -> bool {
        !self.is_balanced()
    }

    pub fn difference(&self) -> f64 {
        match self {
            ReconciliationResult::Balanced { .. } => 0.0,
            ReconciliationResult::MinorDiscrepancy { difference, .. } => *difference,
            ReconciliationResult::MajorDiscrepancy { difference, .. } => *difference,
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub entity: EntityKind,
    pub source_file: String,
    pub result: ReconciliationResult,
    pub csv_count: i64,
    pub db_count: i64,
    pub csv_total: f64,
    pub db_total: f64,
    pub discrepancies: Vec<Discrepancy>,
    pub reconciled_at: chrono::DateTime<chrono::Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.result.is_balanced()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation for {} ({}): CSV {} rows / {:.2}, database {} rows / {:.2}, difference {:.2}",
            self.entity.name(),
            self.source_file,
            self.csv_count,
            self.csv_total,
            self.db_count,
            self.db_total,
            self.result.difference()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub description: String,
    pub amount: f64,
    pub category: DiscrepancyCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscrepancyCategory {
    CountMismatch,
    AmountMismatch,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Tolerance for floating-point comparisons (default: 0.01)
    pub tolerance: f64,

    /// Threshold for minor vs major discrepancy (default: 10.00)
    pub major_discrepancy_threshold: f64,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: 0.01,
            major_discrepancy_threshold: 10.0,
        }
    }

    /// Compare one CSV file with what the database holds for `entity`
    pub fn reconcile(&self, entity: EntityKind, table: &CsvTable, conn: &Connection) -> Result<ReconciliationReport> {
        let aliases = importer_for(entity, &ImportOptions::default()).amount_aliases();
        if !aliases.is_empty() && !table.has_any_header(aliases) {
            tracing::warn!(
                entity = entity.name(),
                file = %table.source_file,
                "⚠️ no amount column found, comparing counts only"
            );
        }
        let csv_count = table.rows.len() as i64;
        let csv_total = csv_amount_total(table, aliases);
        let (db_count, db_total) = db::entity_totals(conn, entity)?;

        tracing::debug!(
            entity = entity.name(),
            csv_count,
            db_count,
            csv_total,
            db_total,
            "reconciling"
        );

        Ok(self.compare(entity, &table.source_file, (csv_count, csv_total), (db_count, db_total)))
    }

    /// Classify a pair of (count, total) observations
    pub fn compare(
        &self,
        entity: EntityKind,
        source_file: &str,
        (csv_count, csv_total): (i64, f64),
        (db_count, db_total): (i64, f64),
    ) -> ReconciliationReport {
        let difference = (csv_total - db_total).abs();
        let missing_rows = csv_count - db_count;

        let result = if missing_rows == 0 && difference < self.tolerance {
            ReconciliationResult::Balanced {
                row_count: db_count,
                amount_total: db_total,
            }
        } else if missing_rows == 0 && difference < self.major_discrepancy_threshold {
            ReconciliationResult::MinorDiscrepancy {
                expected_total: csv_total,
                actual_total: db_total,
                difference,
                tolerance: self.tolerance,
            }
        } else {
            ReconciliationResult::MajorDiscrepancy {
                expected_total: csv_total,
                actual_total: db_total,
                difference,
                missing_rows,
            }
        };

        let mut discrepancies = Vec::new();
        if missing_rows != 0 {
            discrepancies.push(Discrepancy {
                description: format!("Row count mismatch: CSV {} vs database {}", csv_count, db_count),
                amount: missing_rows as f64,
                category: DiscrepancyCategory::CountMismatch,
            });
        }
        if difference >= self.tolerance {
            discrepancies.push(Discrepancy {
                description: format!("Amount mismatch: {:.2} difference", difference),
                amount: difference,
                category: DiscrepancyCategory::AmountMismatch,
            });
        }

        ReconciliationReport {
            entity,
            source_file: source_file.to_string(),
            result,
            csv_count,
            db_count,
            csv_total,
            db_total,
            discrepancies,
            reconciled_at: chrono::Utc::now(),
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Σ |amount| over rows, reading the first non-empty amount alias
fn csv_amount_total(table: &CsvTable, aliases: &[&str]) -> f64 {
    if aliases.is_empty() {
        return 0.0;
    }

    table
        .rows
        .iter()
        .filter_map(|row| row.get_any(aliases))
        .map(|raw| parse_amount(raw).abs())
        .sum()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::{run_import, ExpenseImporter};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    fn table(content: &str) -> CsvTable {
        CsvTable::from_reader("expenses.csv", content.as_bytes()).unwrap()
    }

    #[test]
    fn test_reconciliation_balanced_after_import() {
        let conn = test_db();
        let t = table("Category,Amount\nRent,800000\nAirtime,\"20,000\"\n");
        run_import(&conn, &mut ExpenseImporter::new(), &t, &ImportOptions::default()).unwrap();

        let report = ReconciliationEngine::new()
            .reconcile(EntityKind::Expenses, &t, &conn)
            .unwrap();

        assert_eq!(report.csv_count, 2);
        assert_eq!(report.db_total, 820_000.0);
        assert!(report.is_balanced());
        assert!(report.discrepancies.is_empty());
    }

    #[test]
    fn test_reconciliation_minor_discrepancy() {
        let report = ReconciliationEngine::new().compare(
            EntityKind::Repayments,
            "repayments.csv",
            (3, 150_005.0),
            (3, 150_000.0),
        );

        assert!(!report.is_balanced());
        assert!(matches!(report.result, ReconciliationResult::MinorDiscrepancy { .. }));
        assert!((report.result.difference() - 5.0).abs() < 0.01);
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].category, DiscrepancyCategory::AmountMismatch);
    }

    #[test]
    fn test_reconciliation_major_on_missing_rows() {
        let conn = test_db();
        let t = table("Category,Amount\nRent,800000\nAirtime,20000\nTransport,0\n");
        run_import(&conn, &mut ExpenseImporter::new(), &t, &ImportOptions::default()).unwrap();

        let report = ReconciliationEngine::new()
            .reconcile(EntityKind::Expenses, &t, &conn)
            .unwrap();

        // the zero-amount row was skipped, so one row is missing but totals agree
        match &report.result {
            ReconciliationResult::MajorDiscrepancy { missing_rows, difference, .. } => {
                assert_eq!(*missing_rows, 1);
                assert_eq!(*difference, 0.0);
            }
            other => panic!("expected major discrepancy, got {:?}", other),
        }
        assert_eq!(report.discrepancies[0].category, DiscrepancyCategory::CountMismatch);
    }

    #[test]
    fn test_reconciliation_major_on_large_amount_gap() {
        let report = ReconciliationEngine::new().compare(
            EntityKind::Loans,
            "loans.csv",
            (2, 1_500_000.0),
            (2, 1_000_000.0),
        );

        assert!(matches!(report.result, ReconciliationResult::MajorDiscrepancy { .. }));
        assert!(report.summary().contains("difference 500000.00"));
    }

    #[test]
    fn test_borrowers_reconcile_on_count_only() {
        let conn = test_db();
        let t = table("Name\nJane Doe\nJohn Okello\n");
        db::insert_borrower(&conn, &db::Borrower::new("JD001", "Jane", "Doe")).unwrap();

        let report = ReconciliationEngine::new()
            .reconcile(EntityKind::Borrowers, &t, &conn)
            .unwrap();

        assert_eq!(report.csv_total, 0.0);
        assert_eq!(report.db_count, 1);
        assert!(report.result.has_discrepancy());
    }

    #[test]
    fn test_reconciliation_result_methods() {
        let balanced = ReconciliationResult::Balanced {
            row_count: 2,
            amount_total: 2500.0,
        };
        assert!(balanced.is_balanced());
        assert_eq!(balanced.difference(), 0.0);

        let minor = ReconciliationResult::MinorDiscrepancy {
            expected_total: 2500.0,
            actual_total: 2495.0,
            difference: 5.0,
            tolerance: 0.01,
        };
        assert!(minor.has_discrepancy());
        assert_eq!(minor.difference(), 5.0);
    }
}
