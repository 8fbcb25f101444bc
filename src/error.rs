// ❌ Row-level import errors
// A row error never aborts a file: the import driver logs it and moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowError {
    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("no borrower matches {0:?} and fallback is disabled")]
    UnknownBorrower(String),

    #[error("no loan matches {0:?} and fallback is disabled")]
    UnknownLoan(String),

    #[error("no borrowers in database; import borrowers first")]
    NoBorrowers,

    #[error("no loans in database; import loans first")]
    NoLoans,

    #[error("withdrawal of {amount:.2} exceeds balance {balance:.2} on {account}")]
    InsufficientBalance {
        account: String,
        amount: f64,
        balance: f64,
    },

    #[error("malformed CSV record: {0}")]
    Malformed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type RowResult<T> = std::result::Result<T, RowError>;
