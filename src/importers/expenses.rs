// Expenses: standalone rows, no foreign keys.

use super::{EntityImporter, RowOutcome};
use crate::csv_source::CsvRow;
use crate::db::{self, EntityKind, Expense};
use crate::error::RowResult;
use crate::normalize::{parse_amount, parse_date};
use rusqlite::Connection;

const CATEGORY_ALIASES: &[&str] = &["Category", "Expense Type", "Expense Category", "Type"];
const DESCRIPTION_ALIASES: &[&str] = &["Description", "Details", "Narration", "Item"];
pub const AMOUNT_ALIASES: &[&str] = &["Amount", "Cost", "Total", "Amount Spent"];
const DATE_ALIASES: &[&str] = &["Date", "Expense Date", "Date Paid"];
const PAID_TO_ALIASES: &[&str] = &["Paid To", "Payee", "Vendor", "Supplier"];

pub struct ExpenseImporter;

impl ExpenseImporter {
    pub fn new() -> Self {
        ExpenseImporter
    }
}

impl Default for ExpenseImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityImporter for ExpenseImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Expenses
    }

    fn amount_aliases(&self) -> &'static [&'static str] {
        AMOUNT_ALIASES
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let amount = row.get_any(AMOUNT_ALIASES).map(parse_amount).unwrap_or(0.0);
        if amount <= 0.0 {
            return Ok(RowOutcome::Skipped("expense amount missing or zero".to_string()));
        }

        let expense = Expense {
            id: 0,
            category: row.text(CATEGORY_ALIASES).unwrap_or_else(|| "General".to_string()),
            description: row.text(DESCRIPTION_ALIASES),
            amount,
            expense_date: row.get_any(DATE_ALIASES).and_then(parse_date),
            paid_to: row.text(PAID_TO_ALIASES),
        };

        let id = db::insert_expense(conn, &expense)?;
        Ok(RowOutcome::Inserted(format!("{}#{}", expense.category, id)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{run_import, ImportOptions};
    use super::*;

    #[test]
    fn test_expenses_import_with_default_category() {
        let conn = test_db();
        let t = table(
            "Category,Description,Amount,Date\n\
             Rent,Office rent,\"UGX 800,000\",01/01/2024\n\
             ,Airtime,20000,2024-01-05\n\
             Transport,Boda,0,\n",
        );

        let stats = run_import(&conn, &mut ExpenseImporter::new(), &t, &ImportOptions::default()).unwrap();
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.skipped, 1);

        let (count, total) = db::entity_totals(&conn, EntityKind::Expenses).unwrap();
        assert_eq!(count, 2);
        assert_eq!(total, 820_000.0);

        let general: i64 = conn
            .query_row("SELECT COUNT(*) FROM expenses WHERE category = 'General'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(general, 1);
    }
}
