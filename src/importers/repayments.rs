// Repayments: each new payment decrements the loan's outstanding balance.
// Re-importing the same file is a no-op thanks to the idempotency hash.

use super::{resolve_loan, EntityImporter, ImportOptions, RowOutcome};
use crate::csv_source::CsvRow;
use crate::db::{self, EntityKind, Repayment};
use crate::error::RowResult;
use crate::normalize::{parse_amount, parse_date};
use rusqlite::Connection;

pub const AMOUNT_ALIASES: &[&str] = &[
    "Amount Paid",
    "Payment Amount",
    "Repayment Amount",
    "Amount",
    "Paid",
];
const DATE_ALIASES: &[&str] = &[
    "Payment Date",
    "Date Paid",
    "Repayment Date",
    "Transaction Date",
    "Date",
];
const METHOD_ALIASES: &[&str] = &["Payment Method", "Method", "Mode", "Channel"];
const RECEIPT_ALIASES: &[&str] = &[
    "Receipt Number",
    "Receipt No",
    "Receipt",
    "Reference",
    "Transaction ID",
];

pub struct RepaymentImporter {
    options: ImportOptions,
}

impl RepaymentImporter {
    pub fn new(options: ImportOptions) -> Self {
        RepaymentImporter { options }
    }
}

impl EntityImporter for RepaymentImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Repayments
    }

    fn amount_aliases(&self) -> &'static [&'static str] {
        AMOUNT_ALIASES
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let amount = row.get_any(AMOUNT_ALIASES).map(parse_amount).unwrap_or(0.0);
        if amount <= 0.0 {
            return Ok(RowOutcome::Skipped("repayment amount missing or zero".to_string()));
        }

        let loan = resolve_loan(conn, row, self.options.fallback_to_first_record)?;

        let mut repayment = Repayment::new(loan.id, amount, row.get_any(DATE_ALIASES).and_then(parse_date));
        repayment.method = row.text(METHOD_ALIASES);
        repayment.receipt_number = row.text(RECEIPT_ALIASES);

        if db::insert_repayment(conn, &repayment)?.is_none() {
            return Ok(RowOutcome::Skipped(format!(
                "duplicate repayment of {:.2} on {}",
                amount, loan.loan_number
            )));
        }

        let remaining = db::apply_repayment(conn, loan.id, amount)?;
        tracing::debug!(loan = %loan.loan_number, amount, remaining, "balance updated");

        Ok(RowOutcome::Inserted(loan.loan_number))
    }
}
