// 🔧 Repair Scripts - fix data that drifted after import
//
// Each repair is idempotent: running it twice changes nothing the second
// time. Each returns the number of rows it changed.

use crate::borrower_id::BorrowerIdGenerator;
use crate::db::{self, due_date_for, LoanStatus};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};

/// Balances closer than this are considered equal
const BALANCE_EPSILON: f64 = 0.005;

// ============================================================================
// BORROWER IDS
// ============================================================================

/// Reassign every borrower code from name initials, oldest borrower first.
/// Runs in one transaction: either every code changes or none does.
pub fn regenerate_borrower_ids(conn: &Connection) -> Result<usize> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to start borrower-id transaction")?;

    let borrowers = db::list_borrowers(&tx)?;

    // Park every row on a unique placeholder so new codes never collide with old ones
    for b in &borrowers {
        db::set_borrower_code(&tx, b.id, &format!("__TMP{}", b.id))?;
    }

    let mut generator = BorrowerIdGenerator::new();
    let mut changed = 0;
    for b in &borrowers {
        let code = generator.generate(&b.first_name, &b.last_name);
        if code != b.borrower_code {
            tracing::info!(id = b.id, old = %b.borrower_code, new = %code, "✅ borrower code reassigned");
            changed += 1;
        }
        db::set_borrower_code(&tx, b.id, &code)?;
    }

    tx.commit().context("Failed to commit borrower-id changes")?;
    tracing::info!(total = borrowers.len(), changed, "borrower ids regenerated");
    Ok(changed)
}

// ============================================================================
// DATES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub disbursement_dates: usize,
    pub due_dates: usize,
    pub payment_dates: usize,
}

impl BackfillSummary {
    pub fn total(&self) -> usize {
        self.disbursement_dates + self.due_dates + self.payment_dates
    }
}

/// Fill NULL dates:
/// - loan disbursement ← borrower's latest approved application, else `default`
/// - loan due date ← disbursement + term
/// - repayment date ← its loan's disbursement date
pub fn backfill_missing_dates(conn: &Connection, default: NaiveDate) -> Result<BackfillSummary> {
    let mut summary = BackfillSummary::default();

    for mut loan in db::list_loans(conn)? {
        let mut dirty = false;

        if loan.disbursement_date.is_none() {
            let from_application = db::latest_approved_application(conn, loan.borrower_id)?
                .and_then(|app| app.applied_date);
            loan.disbursement_date = Some(from_application.unwrap_or(default));
            summary.disbursement_dates += 1;
            dirty = true;
        }

        if loan.due_date.is_none() {
            loan.due_date = loan
                .disbursement_date
                .and_then(|d| due_date_for(d, loan.term_months));
            if loan.due_date.is_some() {
                summary.due_dates += 1;
                dirty = true;
            }
        }

        if dirty {
            db::update_loan(conn, &loan)?;
        }
    }

    summary.payment_dates = conn
        .execute(
            "UPDATE repayments
             SET payment_date = (SELECT disbursement_date FROM loans WHERE loans.id = repayments.loan_id)
             WHERE payment_date IS NULL
               AND (SELECT disbursement_date FROM loans WHERE loans.id = repayments.loan_id) IS NOT NULL",
            [],
        )
        .context("Failed to backfill repayment dates")?;

    tracing::info!(
        disbursement = summary.disbursement_dates,
        due = summary.due_dates,
        payments = summary.payment_dates,
        "dates backfilled"
    );
    Ok(summary)
}

// ============================================================================
// BALANCES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceSummary {
    pub loans: usize,
    pub savings: usize,
}

/// Rebuild balances from the transaction tables:
/// - loan outstanding = total due − Σ repayments (floored at 0)
/// - savings balance  = Σ deposits − Σ withdrawals
pub fn recompute_balances(conn: &Connection) -> Result<BalanceSummary> {
    let mut summary = BalanceSummary::default();

    for loan in db::list_loans(conn)? {
        let repaid: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM repayments WHERE loan_id = ?1",
            [loan.id],
            |row| row.get(0),
        )?;
        let outstanding = (loan.total_due - repaid).max(0.0);

        let status = if outstanding <= 0.0 {
            LoanStatus::Completed
        } else if loan.status == LoanStatus::Completed {
            LoanStatus::Active
        } else {
            loan.status
        };

        if (outstanding - loan.outstanding_balance).abs() > BALANCE_EPSILON || status != loan.status {
            tracing::info!(
                loan = %loan.loan_number,
                was = loan.outstanding_balance,
                now = outstanding,
                "✅ loan balance corrected"
            );
            conn.execute(
                "UPDATE loans SET outstanding_balance = ?1, status = ?2 WHERE id = ?3",
                params![outstanding, status, loan.id],
            )?;
            summary.loans += 1;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT s.id, s.account_number, s.balance,
                (SELECT COALESCE(SUM(amount), 0) FROM deposits WHERE savings_id = s.id)
              - (SELECT COALESCE(SUM(amount), 0) FROM withdrawals WHERE savings_id = s.id)
         FROM savings s ORDER BY s.id",
    )?;
    let accounts = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, account_number, stored, computed) in accounts {
        if (stored - computed).abs() > BALANCE_EPSILON {
            tracing::info!(account = %account_number, was = stored, now = computed, "✅ savings balance corrected");
            conn.execute("UPDATE savings SET balance = ?1 WHERE id = ?2", params![computed, id])?;
            summary.savings += 1;
        }
    }

    tracing::info!(loans = summary.loans, savings = summary.savings, "balances recomputed");
    Ok(summary)
}
