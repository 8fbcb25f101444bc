// Loan applications: upsert by application number. A row without a
// credit score is scored by the heuristic at import time.

use super::{
    parse_term, resolve_borrower, EntityImporter, ImportOptions, RowOutcome, PURPOSE_ALIASES,
};
use crate::credit_score::{CreditRating, CreditRequest, MAX_SCORE, MIN_SCORE};
use crate::csv_source::CsvRow;
use crate::db::{self, ApplicationStatus, EntityKind, LoanApplication};
use crate::error::{RowError, RowResult};
use crate::normalize::{parse_amount, parse_amount_opt, parse_date};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;

const NUMBER_ALIASES: &[&str] = &[
    "Application ID",
    "Application Number",
    "Application No",
    "App ID",
    "application_number",
];
pub const AMOUNT_ALIASES: &[&str] = &[
    "Requested Amount",
    "Amount Requested",
    "Loan Amount",
    "Amount",
    "requested_amount",
];
const STATUS_ALIASES: &[&str] = &["Status", "Application Status", "Decision"];
const SCORE_ALIASES: &[&str] = &["Credit Score", "Score", "credit_score"];
const DATE_ALIASES: &[&str] = &["Application Date", "Date Applied", "Applied Date", "Date"];

pub struct ApplicationImporter {
    options: ImportOptions,
    rng: StdRng,
}

impl ApplicationImporter {
    pub fn new(options: ImportOptions) -> Self {
        ApplicationImporter {
            options,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible scoring
    pub fn with_seed(options: ImportOptions, seed: u64) -> Self {
        ApplicationImporter {
            options,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl EntityImporter for ApplicationImporter {
    fn entity(&self) -> EntityKind {
        EntityKind::Applications
    }

    fn amount_aliases(&self) -> &'static [&'static str] {
        AMOUNT_ALIASES
    }

    fn import_row(&mut self, conn: &Connection, row: &CsvRow) -> RowResult<RowOutcome> {
        let requested_amount = row.get_any(AMOUNT_ALIASES).map(parse_amount).unwrap_or(0.0);
        if requested_amount <= 0.0 {
            return Ok(RowOutcome::Skipped("requested amount missing or zero".to_string()));
        }

        let borrower = resolve_borrower(conn, row, self.options.fallback_to_first_record)?;
        let purpose = row.text(PURPOSE_ALIASES);
        let term_months = parse_term(row, self.options.default_term_months);
        let status = row
            .get_any(STATUS_ALIASES)
            .and_then(ApplicationStatus::parse)
            .unwrap_or(ApplicationStatus::Pending);

        let existing = match row.get_any(NUMBER_ALIASES) {
            Some(number) => db::find_application_by_number(conn, number)?,
            None => None,
        };
        let stored_score = existing.as_ref().and_then(|app| app.credit_score);

        let credit_score = match (row.get_any(SCORE_ALIASES), stored_score) {
            (Some(raw), _) => match parse_amount_opt(raw).map(|s| s.round() as i32) {
                Some(score) if (MIN_SCORE..=MAX_SCORE).contains(&score) => score,
                _ => {
                    return Err(RowError::InvalidValue {
                        field: "credit score",
                        value: raw.to_string(),
                    })
                }
            },
            // already scored on an earlier run
            (None, Some(score)) => score,
            (None, None) => {
                let request = CreditRequest::new(
                    requested_amount,
                    purpose.as_deref().unwrap_or(""),
                    term_months,
                );
                request.score_with(&mut self.rng).score
            }
        };
        let credit_rating = CreditRating::from_score(credit_score).as_str().to_string();

        let mut application = match existing {
            Some(app) => app,
            None => LoanApplication {
                id: 0,
                application_number: match row.get_any(NUMBER_ALIASES) {
                    Some(n) => n.trim().to_string(),
                    None => db::next_application_number(conn)?,
                },
                borrower_id: borrower.id,
                requested_amount,
                purpose: None,
                term_months,
                status,
                credit_score: None,
                credit_rating: None,
                applied_date: None,
            },
        };

        application.borrower_id = borrower.id;
        application.requested_amount = requested_amount;
        application.term_months = term_months;
        application.status = status;
        application.credit_score = Some(credit_score);
        application.credit_rating = Some(credit_rating);
        application.applied_date = row
            .get_any(DATE_ALIASES)
            .and_then(parse_date)
            .or(application.applied_date);
        if purpose.is_some() {
            application.purpose = purpose;
        }

        if application.id != 0 {
            db::update_application(conn, &application)?;
            Ok(RowOutcome::Updated(application.application_number))
        } else {
            db::insert_application(conn, &application)?;
            Ok(RowOutcome::Inserted(application.application_number))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::run_import;
    use super::*;

    #[test]
    fn test_missing_score_is_computed_within_bounds() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table(
            "Borrower ID,Requested Amount,Purpose,Term\n\
             JD001,400000,Retail shop stock,6\n",
        );
        let opts = ImportOptions::default();
        let stats = run_import(&conn, &mut ApplicationImporter::with_seed(opts.clone(), 7), &t, &opts).unwrap();
        assert_eq!(stats.imported, 1);

        let app = db::find_application_by_number(&conn, "APP00001").unwrap().unwrap();
        let score = app.credit_score.unwrap();
        // 500 + 50 + 40 + 30, +/- 50 noise
        assert!((570..=670).contains(&score));
        assert!((MIN_SCORE..=MAX_SCORE).contains(&score));
        assert_eq!(app.credit_rating.as_deref(), Some(CreditRating::from_score(score).as_str()));
        assert_eq!(app.status, ApplicationStatus::Pending);
    }

    #[test]
    fn test_csv_score_and_status_are_kept() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table(
            "Application ID,Borrower ID,Amount,Credit Score,Status,Application Date\n\
             APP-9,JD001,2000000,755,Approved,03/02/2024\n",
        );
        let opts = ImportOptions::default();
        run_import(&conn, &mut ApplicationImporter::new(opts.clone()), &t, &opts).unwrap();

        let app = db::find_application_by_number(&conn, "APP-9").unwrap().unwrap();
        assert_eq!(app.credit_score, Some(755));
        assert_eq!(app.credit_rating.as_deref(), Some("Very Good"));
        assert_eq!(app.status, ApplicationStatus::Approved);
        assert_eq!(app.applied_date, chrono::NaiveDate::from_ymd_opt(2024, 2, 3));
    }

    #[test]
    fn test_out_of_range_score_fails_row() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");

        let t = table("Borrower ID,Amount,Credit Score\nJD001,100000,9000\nJD001,100000,n/a\n");
        let opts = ImportOptions::default();
        let stats = run_import(&conn, &mut ApplicationImporter::new(opts.clone()), &t, &opts).unwrap();

        assert_eq!(stats.failed, 2);
        assert!(stats.failures[0].message.contains("invalid credit score"));
    }

    #[test]
    fn test_reimport_keeps_computed_score() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");
        let opts = ImportOptions::default();

        let t = table("Application ID,Borrower ID,Amount,Purpose\nAPP-3,JD001,800000,Poultry\n");
        run_import(&conn, &mut ApplicationImporter::with_seed(opts.clone(), 3), &t, &opts).unwrap();
        let first = db::find_application_by_number(&conn, "APP-3").unwrap().unwrap();

        for seed in [11, 29, 97] {
            let stats = run_import(&conn, &mut ApplicationImporter::with_seed(opts.clone(), seed), &t, &opts).unwrap();
            assert_eq!(stats.updated, 1);

            let again = db::find_application_by_number(&conn, "APP-3").unwrap().unwrap();
            assert_eq!(again.credit_score, first.credit_score);
            assert_eq!(again.credit_rating, first.credit_rating);
        }
    }

    #[test]
    fn test_reimport_updates_existing_application() {
        let conn = test_db();
        seed_borrower(&conn, "JD001", "Jane", "Doe");
        let opts = ImportOptions::default();
        let mut importer = ApplicationImporter::with_seed(opts.clone(), 1);

        let t = table("Application ID,Borrower ID,Amount,Credit Score,Status\nAPP-1,JD001,100000,600,Pending\n");
        run_import(&conn, &mut importer, &t, &opts).unwrap();

        let t = table("Application ID,Borrower ID,Amount,Credit Score,Status\nAPP-1,JD001,100000,600,Declined\n");
        let stats = run_import(&conn, &mut importer, &t, &opts).unwrap();

        assert_eq!(stats.updated, 1);
        assert_eq!(db::count_rows(&conn, "loan_applications").unwrap(), 1);
        let app = db::find_application_by_number(&conn, "APP-1").unwrap().unwrap();
        assert_eq!(app.status, ApplicationStatus::Rejected);
    }
}
