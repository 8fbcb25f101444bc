// Loans: upsert by loan number, borrower resolved by code/name/fallback.

use super::{
    parse_term, resolve_borrower, EntityImporter, ImportOptions, RowOutcome, LOAN_NUMBER_ALIASES,
    PURPOSE_ALIASES,
};
use crate::csv_source::CsvRow;
use crate::db::{self, due_date_for, total_due, EntityKind, Loan, LoanStatus};
use crate::error::RowResult;
use crate::normalize::{parse_amount, parse_amount_opt, parse_date};
use rusqlite::Connection;

pub const PRINCIPAL_ALIASES: &[&str] = &[
    "Loan Amount",
    "Principal",
    "Amount Disbursed",
    "Disbursed Amount",
    "Amount",
    "principal",
];
const RATE_ALIASES: &[&str] = &["Interest Rate", "Interest Rate (%)", "Interest", "Rate", "interest_rate"];
const DISBURSED_ALIASES: &[&str] = &[
    "Disbursement Date",
    "Date Disbursed",
    "Loan Date",
    "Issue Date",
    "Start Date",
    "Date",
];
const DUE_ALIASES: &[&str] = &["Due Date", "Maturity Date", "End Date", "due_date"];
const TOTAL_DUE_ALIASES: &[&str] = &["Total Due", "Total Payable", "Amount Due", "Total Amount"];
const OUTSTANDING_ALIASES: &[&str] = &[
    "Outstanding Balance",
    "Outstanding",
    "Loan Balance",
    "Balance",
];
const STATUS_ALIASES: &[&str] = &["Status", "Loan Status"];

pub struct LoanImporter {
    options: ImportOptions,
}

impl LoanImporter {
    pub fn new(options: ImportOptions) -> Self {
        LoanImporter { options }
    }
}

impl EntityImporter for LoanImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Loans
    }

    fn amount_aliases(&self) -> &'static [&'static str] {
        PRINCIPAL_ALIASES
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let principal = row.get_any(PRINCIPAL_ALIASES).map(parse_amount).unwrap_or(0.0);
        if principal <= 0.0 {
            return Ok(RowOutcome::Skipped("loan amount missing or zero".to_string()));
        }

        let borrower = resolve_borrower(conn, row, self.options.fallback_to_first_record)?;

        let interest_rate = row
            .get_any(RATE_ALIASES)
            .and_then(parse_amount_opt)
            .unwrap_or(self.options.default_interest_rate);
        let term_months = parse_term(row, self.options.default_term_months);

        let total = row
            .get_any(TOTAL_DUE_ALIASES)
            .and_then(parse_amount_opt)
            .filter(|t| *t > 0.0)
            .unwrap_or_else(|| total_due(principal, interest_rate));

        let disbursement_date = row.get_any(DISBURSED_ALIASES).and_then(parse_date);
        let due_date = row
            .get_any(DUE_ALIASES)
            .and_then(parse_date)
            .or_else(|| disbursement_date.and_then(|d| due_date_for(d, term_months)));

        let purpose = row.text(PURPOSE_ALIASES);

        let existing = match row.get_any(LOAN_NUMBER_ALIASES) {
            Some(number) => db::find_loan_by_number(conn, number)?,
            None => None,
        };

        let mut loan = match existing {
            Some(loan) => loan,
            None => {
                let number = match row.get_any(LOAN_NUMBER_ALIASES) {
                    Some(n) => n.trim().to_string(),
                    None => db::next_loan_number(conn)?,
                };
                Loan::new(&number, borrower.id, principal, interest_rate, term_months)
            }
        };

        // Without a balance column, keep whatever has already been repaid
        let outstanding = row
            .get_any(OUTSTANDING_ALIASES)
            .and_then(parse_amount_opt)
            .map(|o| o.max(0.0))
            .unwrap_or_else(|| (total - loan.amount_repaid()).max(0.0));

        let status = row
            .get_any(STATUS_ALIASES)
            .and_then(LoanStatus::parse)
            .unwrap_or(if outstanding <= 0.0 {
                LoanStatus::Completed
            } else {
                LoanStatus::Active
            });

        loan.borrower_id = borrower.id;
        loan.principal = principal;
        loan.interest_rate = interest_rate;
        loan.term_months = term_months;
        loan.total_due = total;
        loan.outstanding_balance = outstanding;
        loan.status = status;
        loan.disbursement_date = disbursement_date.or(loan.disbursement_date);
        loan.due_date = due_date.or(loan.due_date);
        if purpose.is_some() {
            loan.purpose = purpose;
        }

        if loan.id != 0 {
            db::update_loan(conn, &loan)?;
            Ok(RowOutcome::Updated(loan.loan_number))
        } else {
            db::insert_loan(conn, &loan)?;
            Ok(RowOutcome::Inserted(loan.loan_number))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::run_import;
    use super::*;
    use chrono::NaiveDate;

    fn options() -> ImportOptions {
        ImportOptions {
            default_interest_rate: 10.0,
            default_term_months: 6,
            ..ImportOptions::default()
        }
    }

    #[test]
    fn test_import_computes_totals_and_due_dates() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table(
            "Loan ID,Borrower ID,Loan Amount,Interest Rate,Term,Disbursement Date\n\
             LN-1,JD001,\"1,000,000\",20%,6 months,15/01/2024\n",
        );
        let mut importer = LoanImporter::new(options());
        let stats = run_import(&conn, &mut importer, &t, &options()).unwrap();
        assert_eq!(stats.imported, 1);

        let loan = db::find_loan_by_number(&conn, "LN-1").unwrap().unwrap();
        assert_eq!(loan.total_due, 1_200_000.0);
        assert_eq!(loan.outstanding_balance, 1_200_000.0);
        assert_eq!(loan.term_months, 6);
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.disbursement_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(loan.due_date, NaiveDate::from_ymd_opt(2024, 7, 15));
    }

    #[test]
    fn test_defaults_and_generated_number() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Name,Amount\nJane Doe,500000\n");
        run_import(&conn, &mut LoanImporter::new(options()), &t, &options()).unwrap();

        let loan = db::find_loan_by_number(&conn, "LN00001").unwrap().unwrap();
        assert_eq!(loan.interest_rate, 10.0);
        assert_eq!(loan.term_months, 6);
        assert!((loan.total_due - 550_000.0).abs() < 0.001);
        assert_eq!(loan.due_date, None);
    }

    #[test]
    fn test_zero_outstanding_marks_completed() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Borrower ID,Amount,Balance\nJD001,200000,0\n");
        run_import(&conn, &mut LoanImporter::new(options()), &t, &options()).unwrap();

        let loan = db::first_loan(&conn).unwrap().unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.outstanding_balance, 0.0);
    }

    #[test]
    fn test_reimport_updates_by_loan_number() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");
        let mut importer = LoanImporter::new(options());

        let t = table("Loan ID,Borrower ID,Amount,Status\nLN-1,JD001,100000,Active\n");
        run_import(&conn, &mut importer, &t, &options()).unwrap();

        let t = table("Loan ID,Borrower ID,Amount,Status\nLN-1,JD001,100000,Written Off\n");
        let stats = run_import(&conn, &mut importer, &t, &options()).unwrap();

        assert_eq!(stats.updated, 1);
        assert_eq!(db::count_rows(&conn, "loans").unwrap(), 1);
        assert_eq!(db::first_loan(&conn).unwrap().unwrap().status, LoanStatus::Defaulted);
    }

    #[test]
    fn test_reimport_keeps_repaid_amount() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");
        let mut importer = LoanImporter::new(options());

        let t = table("Loan ID,Borrower ID,Amount,Interest Rate\nLN-1,JD001,100000,0\n");
        run_import(&conn, &mut importer, &t, &options()).unwrap();
        let loan = db::find_loan_by_number(&conn, "LN-1").unwrap().unwrap();
        db::apply_repayment(&conn, loan.id, 30_000.0).unwrap();

        run_import(&conn, &mut importer, &t, &options()).unwrap();
        let loan = db::find_loan_by_number(&conn, "LN-1").unwrap().unwrap();
        assert_eq!(loan.outstanding_balance, 70_000.0);
    }

    #[test]
    fn test_unknown_borrower_without_fallback_fails_row() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let strict = ImportOptions {
            fallback_to_first_record: false,
            ..options()
        };
        let t = table("Borrower ID,Amount\nZZ999,100000\nJD001,50000\n");
        let stats = run_import(&conn, &mut LoanImporter::new(strict.clone()), &t, &strict).unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.imported, 1);
    }

    #[test]
    fn test_zero_amount_is_skipped() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Borrower ID,Amount\nJD001,\nJD001,0\n");
        let stats = run_import(&conn, &mut LoanImporter::new(options()), &t, &options()).unwrap();
        assert_eq!(stats.skipped, 2);
    }
}
