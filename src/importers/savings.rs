// Savings: one account per borrower, opened on first sight. Each row is a
// deposit unless its type says withdrawal (or the amount is negative).

use super::{resolve_borrower, EntityImporter, ImportOptions, RowOutcome};
use crate::csv_source::CsvRow;
use crate::db::{self, EntityKind, SavingsAccount, SavingsTransaction, SavingsTxKind};
use crate::error::{RowError, RowResult};
use crate::normalize::{parse_amount, parse_date};
use rusqlite::Connection;

const ACCOUNT_ALIASES: &[&str] = &[
    "Account Number",
    "Account No",
    "Savings Account",
    "Account",
];
const DEPOSIT_AMOUNT_ALIASES: &[&str] = &["Amount", "Deposit", "Deposit Amount", "Savings Amount"];
const WITHDRAWAL_AMOUNT_ALIASES: &[&str] = &["Withdrawal", "Withdrawal Amount"];
pub const AMOUNT_ALIASES: &[&str] = &[
    "Amount",
    "Deposit",
    "Deposit Amount",
    "Savings Amount",
    "Withdrawal",
    "Withdrawal Amount",
];
const TYPE_ALIASES: &[&str] = &["Type", "Transaction Type", "Txn Type"];
const DATE_ALIASES: &[&str] = &["Date", "Transaction Date", "Deposit Date"];
const REFERENCE_ALIASES: &[&str] = &["Reference", "Receipt", "Receipt Number"];

pub struct SavingsImporter {
    options: ImportOptions,
}

impl SavingsImporter {
    pub fn new(options: ImportOptions) -> Self {
        SavingsImporter { options }
    }

    /// (kind, absolute amount)
    fn classify(row: &CsvRow) -> (SavingsTxKind, f64) {
        let typed_withdrawal = row
            .get_any(TYPE_ALIASES)
            .map(|t| t.to_lowercase().contains("withdraw"))
            .unwrap_or(false);

        if let Some(raw) = row.get_any(DEPOSIT_AMOUNT_ALIASES) {
            let amount = parse_amount(raw);
            if typed_withdrawal || amount < 0.0 {
                return (SavingsTxKind::Withdrawal, amount.abs());
            }
            if amount > 0.0 {
                return (SavingsTxKind::Deposit, amount);
            }
        }

        let withdrawn = row
            .get_any(WITHDRAWAL_AMOUNT_ALIASES)
            .map(parse_amount)
            .unwrap_or(0.0);
        (SavingsTxKind::Withdrawal, withdrawn.abs())
    }

    fn account_for(
        conn: &Connection,
        row: &CsvRow,
        borrower_id: i64,
        borrower_code: &str,
    ) -> RowResult<SavingsAccount> {
        if let Some(number) = row.get_any(ACCOUNT_ALIASES) {
            if let Some(account) = db::find_savings_by_number(conn, number)? {
                return Ok(account);
            }
        }

        if let Some(account) = db::find_savings_for_borrower(conn, borrower_id)? {
            return Ok(account);
        }

        let mut account = SavingsAccount {
            id: 0,
            account_number: row
                .text(ACCOUNT_ALIASES)
                .unwrap_or_else(|| format!("SV-{}", borrower_code)),
            borrower_id,
            balance: 0.0,
            opened_date: row.get_any(DATE_ALIASES).and_then(parse_date),
        };
        account.id = db::insert_savings(conn, &account)?;
        tracing::info!(account = %account.account_number, "opened savings account");
        Ok(account)
    }
}

impl EntityImporter for SavingsImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Savings
    }

    fn amount_aliases(&self) -> &'static [&'static str] {
        AMOUNT_ALIASES
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let (kind, amount) = Self::classify(row);
        if amount <= 0.0 {
            return Ok(RowOutcome::Skipped("savings amount missing or zero".to_string()));
        }

        let borrower = resolve_borrower(conn, row, self.options.fallback_to_first_record)?;
        let account = Self::account_for(conn, row, borrower.id, &borrower.borrower_code)?;

        if kind == SavingsTxKind::Withdrawal && amount > account.balance {
            return Err(RowError::InsufficientBalance {
                account: account.account_number,
                amount,
                balance: account.balance,
            });
        }

        let tx = SavingsTransaction {
            id: 0,
            savings_id: account.id,
            amount,
            transaction_date: row.get_any(DATE_ALIASES).and_then(parse_date),
            reference: row.text(REFERENCE_ALIASES),
        };
        let balance = db::record_savings_transaction(conn, kind, &tx)?;
        tracing::debug!(account = %account.account_number, ?kind, amount, balance, "savings updated");

        Ok(RowOutcome::Inserted(account.account_number))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::run_import;
    use super::*;

    #[test]
    fn test_deposits_and_withdrawals_move_balance() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table(
            "Borrower ID,Amount,Type,Date\n\
             JD001,50000,Deposit,01/01/2024\n\
             JD001,20000,Deposit,01/02/2024\n\
             JD001,30000,Withdrawal,01/03/2024\n",
        );
        let opts = ImportOptions::default();
        let stats = run_import(&conn, &mut SavingsImporter::new(opts.clone()), &t, &opts).unwrap();
        assert_eq!(stats.imported, 3);

        let account = db::find_savings_by_number(&conn, "SV-JD001").unwrap().unwrap();
        assert_eq!(account.balance, 40_000.0);
        assert_eq!(account.opened_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(db::count_rows(&conn, "withdrawals").unwrap(), 1);
    }

    #[test]
    fn test_overdraw_fails_row_and_keeps_balance() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Borrower ID,Deposit,Withdrawal\nJD001,10000,\nJD001,,25000\n");
        let opts = ImportOptions::default();
        let stats = run_import(&conn, &mut SavingsImporter::new(opts.clone()), &t, &opts).unwrap();

        assert_eq!(stats.imported, 1);
        assert_eq!(stats.failed, 1);
        assert!(stats.failures[0].message.contains("exceeds balance"));

        let account = db::find_savings_by_number(&conn, "SV-JD001").unwrap().unwrap();
        assert_eq!(account.balance, 10_000.0);
    }

    #[test]
    fn test_explicit_account_number_is_used() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Borrower ID,Account Number,Amount\nJD001,SAV-77,5000\nJD001,SAV-77,-1000\n");
        let opts = ImportOptions::default();
        run_import(&conn, &mut SavingsImporter::new(opts.clone()), &t, &opts).unwrap();

        let account = db::find_savings_by_number(&conn, "SAV-77").unwrap().unwrap();
        assert_eq!(account.balance, 4_000.0);
    }
}
