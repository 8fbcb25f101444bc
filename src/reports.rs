// 📊 Reports - aggregate read-only queries over the portfolio
//
// Everything here is a plain SELECT; reports never write.

use crate::db::LoanStatus;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: LoanStatus,
    pub count: i64,
    pub outstanding: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub borrowers: i64,
    pub loans: i64,
    pub loans_by_status: Vec<StatusCount>,
    pub total_disbursed: f64,
    pub total_due: f64,
    pub total_outstanding: f64,
    pub total_repaid: f64,
    pub savings_balance: f64,
    pub total_expenses: f64,
    /// repaid / due, 0 when nothing is due
    pub collection_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueLoan {
    pub loan_number: String,
    pub borrower_id: i64,
    pub borrower_code: String,
    pub borrower_name: String,
    pub phone: Option<String>,
    pub outstanding_balance: f64,
    pub due_date: NaiveDate,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyCollection {
    /// YYYY-MM
    pub month: String,
    pub repayments: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowerExposure {
    pub borrower_code: String,
    pub borrower_name: String,
    pub open_loans: i64,
    pub outstanding: f64,
}

fn scalar_f64(conn: &Connection, sql: &str) -> Result<f64> {
    conn.query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("Report query failed: {}", sql))
}

fn scalar_i64(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("Report query failed: {}", sql))
}

/// Loan count and outstanding per status (every status listed, even if zero)
pub fn loans_by_status(conn: &Connection) -> Result<Vec<StatusCount>> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(*), COALESCE(SUM(outstanding_balance), 0) FROM loans WHERE status = ?1",
    )?;

    LoanStatus::ALL
        .iter()
        .map(|status| -> Result<StatusCount> {
            let (count, outstanding): (i64, f64) =
                stmt.query_row(params![status], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(StatusCount {
                status: *status,
                count,
                outstanding,
            })
        })
        .collect()
}

pub fn portfolio_summary(conn: &Connection) -> Result<PortfolioSummary> {
    let total_due = scalar_f64(conn, "SELECT COALESCE(SUM(total_due), 0) FROM loans")?;
    let total_repaid = scalar_f64(conn, "SELECT COALESCE(SUM(amount), 0) FROM repayments")?;

    Ok(PortfolioSummary {
        borrowers: scalar_i64(conn, "SELECT COUNT(*) FROM borrowers")?,
        loans: scalar_i64(conn, "SELECT COUNT(*) FROM loans")?,
        loans_by_status: loans_by_status(conn)?,
        total_disbursed: scalar_f64(conn, "SELECT COALESCE(SUM(principal), 0) FROM loans")?,
        total_due,
        total_outstanding: scalar_f64(conn, "SELECT COALESCE(SUM(outstanding_balance), 0) FROM loans")?,
        total_repaid,
        savings_balance: scalar_f64(conn, "SELECT COALESCE(SUM(balance), 0) FROM savings")?,
        total_expenses: scalar_f64(conn, "SELECT COALESCE(SUM(amount), 0) FROM expenses")?,
        collection_rate: if total_due > 0.0 { total_repaid / total_due } else { 0.0 },
    })
}

/// Open loans past their due date with money still owed, most overdue first
pub fn overdue_loans(conn: &Connection, as_of: NaiveDate) -> Result<Vec<OverdueLoan>> {
    let mut stmt = conn.prepare(
        "SELECT l.loan_number, b.id, b.borrower_code, b.first_name, b.last_name, b.phone,
                l.outstanding_balance, l.due_date
         FROM loans l JOIN borrowers b ON b.id = l.borrower_id
         WHERE l.status IN ('active', 'defaulted')
           AND l.outstanding_balance > 0
           AND l.due_date IS NOT NULL
           AND l.due_date < ?1
         ORDER BY l.due_date, l.id",
    )?;

    let loans = stmt
        .query_map([as_of], |row| {
            let first: String = row.get(3)?;
            let last: String = row.get(4)?;
            let due_date: NaiveDate = row.get(7)?;
            Ok(OverdueLoan {
                loan_number: row.get(0)?,
                borrower_id: row.get(1)?,
                borrower_code: row.get(2)?,
                borrower_name: format!("{} {}", first, last).trim().to_string(),
                phone: row.get(5)?,
                outstanding_balance: row.get(6)?,
                due_date,
                days_overdue: (as_of - due_date).num_days(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(loans)
}

/// Repayments grouped by calendar month; undated repayments are left out
pub fn monthly_collections(conn: &Connection) -> Result<Vec<MonthlyCollection>> {
    let mut stmt = conn.prepare(
        "SELECT substr(payment_date, 1, 7) AS month, COUNT(*), SUM(amount)
         FROM repayments
         WHERE payment_date IS NOT NULL
         GROUP BY month
         ORDER BY month",
    )?;

    let months = stmt
        .query_map([], |row| {
            Ok(MonthlyCollection {
                month: row.get(0)?,
                repayments: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(months)
}

pub fn top_borrowers_by_outstanding(conn: &Connection, limit: usize) -> Result<Vec<BorrowerExposure>> {
    let mut stmt = conn.prepare(
        "SELECT b.borrower_code, b.first_name, b.last_name, COUNT(l.id), SUM(l.outstanding_balance) AS owed
         FROM borrowers b JOIN loans l ON l.borrower_id = b.id
         WHERE l.outstanding_balance > 0
         GROUP BY b.id
         ORDER BY owed DESC, b.id
         LIMIT ?1",
    )?;

    let rows = stmt
        .query_map([limit as i64], |row| {
            let first: String = row.get(1)?;
            let last: String = row.get(2)?;
            Ok(BorrowerExposure {
                borrower_code: row.get(0)?,
                borrower_name: format!("{} {}", first, last).trim().to_string(),
                open_loans: row.get(3)?,
                outstanding: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}
