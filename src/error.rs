// Error taxonomy shared by the store, the interchange engine and the API layer

use thiserror::Error;

use crate::branch::BranchId;

/// Failures of the record store
#[derive(Debug, Error)]
pub enum StoreError {
    /// update/delete/get referenced an identity that does not exist
    #[error("branch {0} not found")]
    NotFound(BranchId),

    /// SQLite unreachable, disk error or constraint violation
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Failures of bulk import/export
#[derive(Debug, Error)]
pub enum InterchangeError {
    /// Malformed or unparsable tabular input; nothing was applied
    #[error("invalid dataset: {0}")]
    Validation(String),

    /// The snapshot read (export) failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The xlsx artifact could not be produced
    #[error("failed to write workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// The csv artifact could not be produced
    #[error("failed to write csv: {0}")]
    Csv(#[source] csv::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl InterchangeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        InterchangeError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, InterchangeError::Validation(_))
    }
}

impl From<calamine::Error> for InterchangeError {
    fn from(e: calamine::Error) -> Self {
        InterchangeError::Validation(format!("not a readable spreadsheet: {}", e))
    }
}
