use thiserror::Error;

use kore_core::{DomainError, ErrorKind};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage operation error.
///
/// Business rule failures pass through unchanged as [`StoreError::Domain`];
/// the other variants are infrastructure faults (storage, locking, config).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("database error: {0}")]
    Database(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Taxonomy category for domain failures; `None` for infrastructure faults.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.domain().map(DomainError::kind)
    }

    /// Emit a warning for rejected consistency checks and pass the error on.
    pub(crate) fn traced(self) -> Self {
        if self.kind() == Some(ErrorKind::Consistency) {
            tracing::warn!(error = %self, "consistency check rejected");
        }
        self
    }
}
