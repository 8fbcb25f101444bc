use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// ENTITY KINDS (import order = dependency order)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Borrowers,
    Loans,
    Repayments,
    Savings,
    Expenses,
    Applications,
}

impl EntityKind {
    /// Parents before children: later entities hold foreign keys into earlier ones
    pub const IMPORT_ORDER: [EntityKind; 6] = [
        EntityKind::Borrowers,
        EntityKind::Loans,
        EntityKind::Repayments,
        EntityKind::Savings,
        EntityKind::Expenses,
        EntityKind::Applications,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Borrowers => "borrowers",
            EntityKind::Loans => "loans",
            EntityKind::Repayments => "repayments",
            EntityKind::Savings => "savings",
            EntityKind::Expenses => "expenses",
            EntityKind::Applications => "applications",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s.trim().to_lowercase().as_str() {
            "borrower" | "borrowers" => Some(EntityKind::Borrowers),
            "loan" | "loans" => Some(EntityKind::Loans),
            "repayment" | "repayments" | "payments" => Some(EntityKind::Repayments),
            "saving" | "savings" => Some(EntityKind::Savings),
            "expense" | "expenses" => Some(EntityKind::Expenses),
            "application" | "applications" | "loan_applications" => {
                Some(EntityKind::Applications)
            }
            _ => None,
        }
    }

    /// Tables owned by this entity, children first (delete order)
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Borrowers => &["borrowers"],
            EntityKind::Loans => &["loans"],
            EntityKind::Repayments => &["repayments"],
            EntityKind::Savings => &["deposits", "withdrawals", "savings"],
            EntityKind::Expenses => &["expenses"],
            EntityKind::Applications => &["loan_applications"],
        }
    }
}

// ============================================================================
// STATUS ENUMS (stored as lowercase text)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Active,
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 4] = [
        LoanStatus::Pending,
        LoanStatus::Active,
        LoanStatus::Completed,
        LoanStatus::Defaulted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    /// Lenient parse of spreadsheet labels ("Disbursed", "Paid", "Written off")
    pub fn parse(s: &str) -> Option<LoanStatus> {
        match crate::normalize::normalize_status(s).as_str() {
            "pending" | "approved" | "new" => Some(LoanStatus::Pending),
            "active" | "disbursed" | "running" | "ongoing" | "open" | "overdue" => {
                Some(LoanStatus::Active)
            }
            "completed" | "complete" | "paid" | "fully_paid" | "closed" | "cleared" => {
                Some(LoanStatus::Completed)
            }
            "defaulted" | "default" | "written_off" | "bad_debt" => Some(LoanStatus::Defaulted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<ApplicationStatus> {
        match crate::normalize::normalize_status(s).as_str() {
            "pending" | "submitted" | "under_review" | "new" => Some(ApplicationStatus::Pending),
            "approved" | "accepted" | "disbursed" => Some(ApplicationStatus::Approved),
            "rejected" | "declined" | "denied" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                <$ty>::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown status: {}", s).into()))
            }
        }
    };
}

text_enum_sql!(LoanStatus);
text_enum_sql!(ApplicationStatus);

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Borrower - `id` is 0 until inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Borrower {
    pub id: i64,
    pub borrower_code: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Borrower {
    pub fn new(borrower_code: &str, first_name: &str, last_name: &str) -> Self {
        Borrower {
            id: 0,
            borrower_code: borrower_code.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: None,
            email: None,
            national_id: None,
            address: None,
            occupation: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub loan_number: String,
    pub borrower_id: i64,
    pub principal: f64,
    /// Flat percentage over the whole term
    pub interest_rate: f64,
    pub term_months: u32,
    pub total_due: f64,
    pub outstanding_balance: f64,
    pub status: LoanStatus,
    pub disbursement_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub purpose: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    pub fn new(loan_number: &str, borrower_id: i64, principal: f64, interest_rate: f64, term_months: u32) -> Self {
        let total_due = total_due(principal, interest_rate);
        Loan {
            id: 0,
            loan_number: loan_number.to_string(),
            borrower_id,
            principal,
            interest_rate,
            term_months,
            total_due,
            outstanding_balance: total_due,
            status: LoanStatus::Active,
            disbursement_date: None,
            due_date: None,
            purpose: None,
            created_at: Utc::now(),
        }
    }

    pub fn amount_repaid(&self) -> f64 {
        (self.total_due - self.outstanding_balance).max(0.0)
    }
}

/// principal × (1 + rate/100)
pub fn total_due(principal: f64, interest_rate: f64) -> f64 {
    principal * (1.0 + interest_rate / 100.0)
}

/// disbursement + term months (clamped to month end)
pub fn due_date_for(disbursed: NaiveDate, term_months: u32) -> Option<NaiveDate> {
    disbursed.checked_add_months(chrono::Months::new(term_months))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repayment {
    pub id: i64,
    pub loan_id: i64,
    pub amount: f64,
    pub payment_date: Option<NaiveDate>,
    pub method: Option<String>,
    pub receipt_number: Option<String>,
}

impl Repayment {
    pub fn new(loan_id: i64, amount: f64, payment_date: Option<NaiveDate>) -> Self {
        Repayment {
            id: 0,
            loan_id,
            amount,
            payment_date,
            method: None,
            receipt_number: None,
        }
    }

    /// Deduplication key: the same receipt imported twice hashes the same
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{:.2}|{}",
            self.loan_id,
            self.payment_date.map(|d| d.to_string()).unwrap_or_default(),
            self.amount,
            self.receipt_number.as_deref().unwrap_or("")
        ));
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsAccount {
    pub id: i64,
    pub account_number: String,
    pub borrower_id: i64,
    pub balance: f64,
    pub opened_date: Option<NaiveDate>,
}

/// Deposit or withdrawal row (same shape, different table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsTransaction {
    pub id: i64,
    pub savings_id: i64,
    pub amount: f64,
    pub transaction_date: Option<NaiveDate>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsTxKind {
    Deposit,
    Withdrawal,
}

impl SavingsTxKind {
    fn table(&self) -> &'static str {
        match self {
            SavingsTxKind::Deposit => "deposits",
            SavingsTxKind::Withdrawal => "withdrawals",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub category: String,
    pub description: Option<String>,
    pub amount: f64,
    pub expense_date: Option<NaiveDate>,
    pub paid_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub id: i64,
    pub application_number: String,
    pub borrower_id: i64,
    pub requested_amount: f64,
    pub purpose: Option<String>,
    pub term_months: u32,
    pub status: ApplicationStatus,
    pub credit_score: Option<i32>,
    pub credit_rating: Option<String>,
    pub applied_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub borrower_id: Option<i64>,
    pub channel: String,
    pub kind: String,
    pub recipient: String,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'staff',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS borrowers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            borrower_code TEXT UNIQUE NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL DEFAULT '',
            phone TEXT,
            email TEXT,
            national_id TEXT,
            address TEXT,
            occupation TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS loans (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            loan_number TEXT UNIQUE NOT NULL,
            borrower_id INTEGER NOT NULL REFERENCES borrowers(id) ON DELETE CASCADE,
            principal REAL NOT NULL,
            interest_rate REAL NOT NULL DEFAULT 0,
            term_months INTEGER NOT NULL DEFAULT 0,
            total_due REAL NOT NULL,
            outstanding_balance REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            disbursement_date TEXT,
            due_date TEXT,
            purpose TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS loan_applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_number TEXT UNIQUE NOT NULL,
            borrower_id INTEGER NOT NULL REFERENCES borrowers(id) ON DELETE CASCADE,
            requested_amount REAL NOT NULL,
            purpose TEXT,
            term_months INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            credit_score INTEGER,
            credit_rating TEXT,
            applied_date TEXT
        );

        CREATE TABLE IF NOT EXISTS repayments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            loan_id INTEGER NOT NULL REFERENCES loans(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            payment_date TEXT,
            method TEXT,
            receipt_number TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS savings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_number TEXT UNIQUE NOT NULL,
            borrower_id INTEGER NOT NULL REFERENCES borrowers(id) ON DELETE CASCADE,
            balance REAL NOT NULL DEFAULT 0,
            opened_date TEXT
        );

        CREATE TABLE IF NOT EXISTS deposits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            savings_id INTEGER NOT NULL REFERENCES savings(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            transaction_date TEXT,
            reference TEXT
        );

        CREATE TABLE IF NOT EXISTS withdrawals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            savings_id INTEGER NOT NULL REFERENCES savings(id) ON DELETE CASCADE,
            amount REAL NOT NULL,
            transaction_date TEXT,
            reference TEXT
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            expense_date TEXT,
            paid_to TEXT
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            borrower_id INTEGER REFERENCES borrowers(id) ON DELETE CASCADE,
            channel TEXT NOT NULL,
            kind TEXT NOT NULL,
            recipient TEXT NOT NULL,
            message TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_borrowers_name ON borrowers(first_name, last_name);
        CREATE INDEX IF NOT EXISTS idx_loans_borrower ON loans(borrower_id);
        CREATE INDEX IF NOT EXISTS idx_loans_status ON loans(status);
        CREATE INDEX IF NOT EXISTS idx_repayments_loan ON repayments(loan_id);
        CREATE INDEX IF NOT EXISTS idx_savings_borrower ON savings(borrower_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

/// Open (or create) the database file and apply the schema
pub fn open_database(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// USERS
// ============================================================================

/// Look up a user by username, creating it on first use
pub fn ensure_user(conn: &Connection, username: &str, full_name: &str, role: &str) -> rusqlite::Result<User> {
    conn.execute(
        "INSERT OR IGNORE INTO users (username, full_name, role, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, full_name, role, Utc::now()],
    )?;

    conn.query_row(
        "SELECT id, username, full_name, role, created_at FROM users WHERE username = ?1",
        [username],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                full_name: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
}

// ============================================================================
// BORROWERS
// ============================================================================

const BORROWER_COLUMNS: &str =
    "id, borrower_code, first_name, last_name, phone, email, national_id, address, occupation, created_at";

fn borrower_from_row(row: &Row<'_>) -> rusqlite::Result<Borrower> {
    Ok(Borrower {
        id: row.get(0)?,
        borrower_code: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        national_id: row.get(6)?,
        address: row.get(7)?,
        occupation: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn insert_borrower(conn: &Connection, b: &Borrower) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO borrowers (borrower_code, first_name, last_name, phone, email,
                                national_id, address, occupation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            b.borrower_code,
            b.first_name,
            b.last_name,
            b.phone,
            b.email,
            b.national_id,
            b.address,
            b.occupation,
            b.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_borrower(conn: &Connection, b: &Borrower) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE borrowers
         SET borrower_code = ?1, first_name = ?2, last_name = ?3, phone = ?4, email = ?5,
             national_id = ?6, address = ?7, occupation = ?8
         WHERE id = ?9",
        params![
            b.borrower_code,
            b.first_name,
            b.last_name,
            b.phone,
            b.email,
            b.national_id,
            b.address,
            b.occupation,
            b.id,
        ],
    )?;
    Ok(())
}

pub fn get_borrower(conn: &Connection, id: i64) -> rusqlite::Result<Option<Borrower>> {
    conn.query_row(
        &format!("SELECT {} FROM borrowers WHERE id = ?1", BORROWER_COLUMNS),
        [id],
        borrower_from_row,
    )
    .optional()
}

pub fn find_borrower_by_code(conn: &Connection, code: &str) -> rusqlite::Result<Option<Borrower>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM borrowers WHERE borrower_code = ?1 COLLATE NOCASE",
            BORROWER_COLUMNS
        ),
        [code.trim()],
        borrower_from_row,
    )
    .optional()
}

/// Exact (case-insensitive) match on first + last name; oldest record wins
pub fn find_borrower_by_name(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
) -> rusqlite::Result<Option<Borrower>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM borrowers
             WHERE first_name = ?1 COLLATE NOCASE AND last_name = ?2 COLLATE NOCASE
             ORDER BY id LIMIT 1",
            BORROWER_COLUMNS
        ),
        params![first_name.trim(), last_name.trim()],
        borrower_from_row,
    )
    .optional()
}

pub fn first_borrower(conn: &Connection) -> rusqlite::Result<Option<Borrower>> {
    conn.query_row(
        &format!("SELECT {} FROM borrowers ORDER BY id LIMIT 1", BORROWER_COLUMNS),
        [],
        borrower_from_row,
    )
    .optional()
}

pub fn list_borrowers(conn: &Connection) -> rusqlite::Result<Vec<Borrower>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM borrowers ORDER BY id", BORROWER_COLUMNS))?;
    let borrowers = stmt
        .query_map([], borrower_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(borrowers)
}

pub fn all_borrower_codes(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT borrower_code FROM borrowers")?;
    let codes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(codes)
}

pub fn set_borrower_code(conn: &Connection, id: i64, code: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE borrowers SET borrower_code = ?1 WHERE id = ?2",
        params![code, id],
    )?;
    Ok(())
}

// ============================================================================
// LOANS
// ============================================================================

const LOAN_COLUMNS: &str = "id, loan_number, borrower_id, principal, interest_rate, term_months,
     total_due, outstanding_balance, status, disbursement_date, due_date, purpose, created_at";

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        loan_number: row.get(1)?,
        borrower_id: row.get(2)?,
        principal: row.get(3)?,
        interest_rate: row.get(4)?,
        term_months: row.get(5)?,
        total_due: row.get(6)?,
        outstanding_balance: row.get(7)?,
        status: row.get(8)?,
        disbursement_date: row.get(9)?,
        due_date: row.get(10)?,
        purpose: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub fn insert_loan(conn: &Connection, loan: &Loan) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO loans (loan_number, borrower_id, principal, interest_rate, term_months,
                            total_due, outstanding_balance, status, disbursement_date,
                            due_date, purpose, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            loan.loan_number,
            loan.borrower_id,
            loan.principal,
            loan.interest_rate,
            loan.term_months,
            loan.total_due,
            loan.outstanding_balance,
            loan.status,
            loan.disbursement_date,
            loan.due_date,
            loan.purpose,
            loan.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_loan(conn: &Connection, loan: &Loan) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE loans
         SET borrower_id = ?1, principal = ?2, interest_rate = ?3, term_months = ?4,
             total_due = ?5, outstanding_balance = ?6, status = ?7, disbursement_date = ?8,
             due_date = ?9, purpose = ?10
         WHERE id = ?11",
        params![
            loan.borrower_id,
            loan.principal,
            loan.interest_rate,
            loan.term_months,
            loan.total_due,
            loan.outstanding_balance,
            loan.status,
            loan.disbursement_date,
            loan.due_date,
            loan.purpose,
            loan.id,
        ],
    )?;
    Ok(())
}

pub fn get_loan(conn: &Connection, id: i64) -> rusqlite::Result<Option<Loan>> {
    conn.query_row(
        &format!("SELECT {} FROM loans WHERE id = ?1", LOAN_COLUMNS),
        [id],
        loan_from_row,
    )
    .optional()
}

pub fn find_loan_by_number(conn: &Connection, loan_number: &str) -> rusqlite::Result<Option<Loan>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM loans WHERE loan_number = ?1 COLLATE NOCASE",
            LOAN_COLUMNS
        ),
        [loan_number.trim()],
        loan_from_row,
    )
    .optional()
}

/// Most recent loan that still owes money, else the most recent loan
pub fn latest_loan_for_borrower(conn: &Connection, borrower_id: i64) -> rusqlite::Result<Option<Loan>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM loans WHERE borrower_id = ?1
             ORDER BY (outstanding_balance > 0) DESC, disbursement_date DESC, id DESC
             LIMIT 1",
            LOAN_COLUMNS
        ),
        [borrower_id],
        loan_from_row,
    )
    .optional()
}

pub fn first_loan(conn: &Connection) -> rusqlite::Result<Option<Loan>> {
    conn.query_row(
        &format!("SELECT {} FROM loans ORDER BY id LIMIT 1", LOAN_COLUMNS),
        [],
        loan_from_row,
    )
    .optional()
}

pub fn list_loans(conn: &Connection) -> rusqlite::Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM loans ORDER BY id", LOAN_COLUMNS))?;
    let loans = stmt
        .query_map([], loan_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(loans)
}

/// Next free "LN00001"-style number
pub fn next_loan_number(conn: &Connection) -> rusqlite::Result<String> {
    let max_id: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM loans", [], |row| row.get(0))?;
    let mut n = max_id + 1;
    loop {
        let candidate = format!("LN{:05}", n);
        if find_loan_by_number(conn, &candidate)?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// outstanding -= amount, floored at 0; a loan that reaches 0 is completed.
/// Returns the new outstanding balance.
pub fn apply_repayment(conn: &Connection, loan_id: i64, amount: f64) -> rusqlite::Result<f64> {
    let outstanding: f64 = conn.query_row(
        "SELECT outstanding_balance FROM loans WHERE id = ?1",
        [loan_id],
        |row| row.get(0),
    )?;

    let remaining = (outstanding - amount).max(0.0);
    let status_sql = if remaining <= 0.0 {
        "UPDATE loans SET outstanding_balance = ?1, status = 'completed' WHERE id = ?2"
    } else {
        "UPDATE loans SET outstanding_balance = ?1 WHERE id = ?2"
    };
    conn.execute(status_sql, params![remaining, loan_id])?;

    Ok(remaining)
}

// ============================================================================
// REPAYMENTS
// ============================================================================

/// Insert unless an identical repayment exists. Returns the new id, or None
/// for a duplicate.
pub fn insert_repayment(conn: &Connection, r: &Repayment) -> rusqlite::Result<Option<i64>> {
    let hash = r.compute_idempotency_hash();

    let result = conn.execute(
        "INSERT INTO repayments (idempotency_hash, loan_id, amount, payment_date, method,
                                 receipt_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            hash,
            r.loan_id,
            r.amount,
            r.payment_date,
            r.method,
            r.receipt_number,
            Utc::now(),
        ],
    );

    match result {
        Ok(_) => Ok(Some(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn repayments_for_loan(conn: &Connection, loan_id: i64) -> rusqlite::Result<Vec<Repayment>> {
    let mut stmt = conn.prepare(
        "SELECT id, loan_id, amount, payment_date, method, receipt_number
         FROM repayments WHERE loan_id = ?1 ORDER BY payment_date, id",
    )?;
    let repayments = stmt
        .query_map([loan_id], |row| {
            Ok(Repayment {
                id: row.get(0)?,
                loan_id: row.get(1)?,
                amount: row.get(2)?,
                payment_date: row.get(3)?,
                method: row.get(4)?,
                receipt_number: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(repayments)
}

// ============================================================================
// SAVINGS
// ============================================================================

fn savings_from_row(row: &Row<'_>) -> rusqlite::Result<SavingsAccount> {
    Ok(SavingsAccount {
        id: row.get(0)?,
        account_number: row.get(1)?,
        borrower_id: row.get(2)?,
        balance: row.get(3)?,
        opened_date: row.get(4)?,
    })
}

pub fn find_savings_by_number(conn: &Connection, account_number: &str) -> rusqlite::Result<Option<SavingsAccount>> {
    conn.query_row(
        "SELECT id, account_number, borrower_id, balance, opened_date
         FROM savings WHERE account_number = ?1 COLLATE NOCASE",
        [account_number.trim()],
        savings_from_row,
    )
    .optional()
}

pub fn find_savings_for_borrower(conn: &Connection, borrower_id: i64) -> rusqlite::Result<Option<SavingsAccount>> {
    conn.query_row(
        "SELECT id, account_number, borrower_id, balance, opened_date
         FROM savings WHERE borrower_id = ?1 ORDER BY id LIMIT 1",
        [borrower_id],
        savings_from_row,
    )
    .optional()
}

pub fn get_savings(conn: &Connection, id: i64) -> rusqlite::Result<Option<SavingsAccount>> {
    conn.query_row(
        "SELECT id, account_number, borrower_id, balance, opened_date FROM savings WHERE id = ?1",
        [id],
        savings_from_row,
    )
    .optional()
}

pub fn insert_savings(conn: &Connection, account: &SavingsAccount) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO savings (account_number, borrower_id, balance, opened_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            account.account_number,
            account.borrower_id,
            account.balance,
            account.opened_date,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record a deposit/withdrawal row and move the balance. Withdrawals are
/// not checked here; callers compare against the balance first.
pub fn record_savings_transaction(
    conn: &Connection,
    kind: SavingsTxKind,
    tx: &SavingsTransaction,
) -> rusqlite::Result<f64> {
    conn.execute(
        &format!(
            "INSERT INTO {} (savings_id, amount, transaction_date, reference) VALUES (?1, ?2, ?3, ?4)",
            kind.table()
        ),
        params![tx.savings_id, tx.amount, tx.transaction_date, tx.reference],
    )?;

    let delta = match kind {
        SavingsTxKind::Deposit => tx.amount,
        SavingsTxKind::Withdrawal => -tx.amount,
    };

    conn.execute(
        "UPDATE savings SET balance = balance + ?1 WHERE id = ?2",
        params![delta, tx.savings_id],
    )?;

    conn.query_row(
        "SELECT balance FROM savings WHERE id = ?1",
        [tx.savings_id],
        |row| row.get(0),
    )
}

// ============================================================================
// EXPENSES
// ============================================================================

pub fn insert_expense(conn: &Connection, e: &Expense) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO expenses (category, description, amount, expense_date, paid_to)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![e.category, e.description, e.amount, e.expense_date, e.paid_to],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// LOAN APPLICATIONS
// ============================================================================

const APPLICATION_COLUMNS: &str = "id, application_number, borrower_id, requested_amount, purpose,
     term_months, status, credit_score, credit_rating, applied_date";

fn application_from_row(row: &Row<'_>) -> rusqlite::Result<LoanApplication> {
    Ok(LoanApplication {
        id: row.get(0)?,
        application_number: row.get(1)?,
        borrower_id: row.get(2)?,
        requested_amount: row.get(3)?,
        purpose: row.get(4)?,
        term_months: row.get(5)?,
        status: row.get(6)?,
        credit_score: row.get(7)?,
        credit_rating: row.get(8)?,
        applied_date: row.get(9)?,
    })
}

pub fn insert_application(conn: &Connection, a: &LoanApplication) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO loan_applications (application_number, borrower_id, requested_amount, purpose,
                                        term_months, status, credit_score, credit_rating, applied_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            a.application_number,
            a.borrower_id,
            a.requested_amount,
            a.purpose,
            a.term_months,
            a.status,
            a.credit_score,
            a.credit_rating,
            a.applied_date,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_application(conn: &Connection, a: &LoanApplication) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE loan_applications
         SET borrower_id = ?1, requested_amount = ?2, purpose = ?3, term_months = ?4, status = ?5,
             credit_score = ?6, credit_rating = ?7, applied_date = ?8
         WHERE id = ?9",
        params![
            a.borrower_id,
            a.requested_amount,
            a.purpose,
            a.term_months,
            a.status,
            a.credit_score,
            a.credit_rating,
            a.applied_date,
            a.id,
        ],
    )?;
    Ok(())
}

pub fn find_application_by_number(conn: &Connection, number: &str) -> rusqlite::Result<Option<LoanApplication>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM loan_applications WHERE application_number = ?1 COLLATE NOCASE",
            APPLICATION_COLUMNS
        ),
        [number.trim()],
        application_from_row,
    )
    .optional()
}

/// Latest approved application for a borrower (used to backfill loan dates)
pub fn latest_approved_application(conn: &Connection, borrower_id: i64) -> rusqlite::Result<Option<LoanApplication>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM loan_applications
             WHERE borrower_id = ?1 AND status = 'approved' AND applied_date IS NOT NULL
             ORDER BY applied_date DESC LIMIT 1",
            APPLICATION_COLUMNS
        ),
        [borrower_id],
        application_from_row,
    )
    .optional()
}

pub fn next_application_number(conn: &Connection) -> rusqlite::Result<String> {
    let max_id: i64 = conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM loan_applications",
        [],
        |row| row.get(0),
    )?;
    let mut n = max_id + 1;
    loop {
        let candidate = format!("APP{:05}", n);
        if find_application_by_number(conn, &candidate)?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

pub fn insert_notification(conn: &Connection, n: &Notification) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO notifications (borrower_id, channel, kind, recipient, message, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            n.borrower_id,
            n.channel,
            n.kind,
            n.recipient,
            n.message,
            n.status,
            n.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn notifications_for_borrower(conn: &Connection, borrower_id: i64) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, borrower_id, channel, kind, recipient, message, status, created_at
         FROM notifications WHERE borrower_id = ?1 ORDER BY id",
    )?;
    let notifications = stmt
        .query_map([borrower_id], |row| {
            Ok(Notification {
                id: row.get(0)?,
                borrower_id: row.get(1)?,
                channel: row.get(2)?,
                kind: row.get(3)?,
                recipient: row.get(4)?,
                message: row.get(5)?,
                status: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notifications)
}

// ============================================================================
// COUNTS, TOTALS, CLEARING
// ============================================================================

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in {}", table))?;
    Ok(count)
}

/// (row count, amount total) as stored, per entity
pub fn entity_totals(conn: &Connection, entity: EntityKind) -> Result<(i64, f64)> {
    let sql = match entity {
        EntityKind::Borrowers => "SELECT COUNT(*), 0.0 FROM borrowers",
        EntityKind::Loans => "SELECT COUNT(*), COALESCE(SUM(principal), 0) FROM loans",
        EntityKind::Repayments => "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM repayments",
        EntityKind::Savings => {
            "SELECT
                (SELECT COUNT(*) FROM deposits) + (SELECT COUNT(*) FROM withdrawals),
                (SELECT COALESCE(SUM(amount), 0) FROM deposits)
                  + (SELECT COALESCE(SUM(amount), 0) FROM withdrawals)"
        }
        EntityKind::Expenses => "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM expenses",
        EntityKind::Applications => {
            "SELECT COUNT(*), COALESCE(SUM(requested_amount), 0) FROM loan_applications"
        }
    };

    let totals = conn
        .query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
        .with_context(|| format!("Failed to total {}", entity.name()))?;
    Ok(totals)
}

/// Delete every row of the given entities, children before parents.
/// Returns the number of rows removed.
pub fn clear_tables(conn: &Connection, entities: &[EntityKind]) -> Result<usize> {
    let mut ordered: Vec<EntityKind> = EntityKind::IMPORT_ORDER
        .iter()
        .rev()
        .filter(|e| entities.contains(e))
        .copied()
        .collect();
    ordered.dedup();

    let mut removed = 0;
    for entity in ordered {
        for table in entity.tables() {
            removed += conn
                .execute(&format!("DELETE FROM {}", table), [])
                .with_context(|| format!("Failed to clear {}", table))?;
        }
    }

    Ok(removed)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
