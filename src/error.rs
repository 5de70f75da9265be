//! Error types for the confdb storage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfDbError>;

#[derive(Error, Debug)]
pub enum ConfDbError {
    /// Underlying file I/O failed (permissions, missing directory, disk error).
    #[error("storage unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// An update or delete targeted a revision that has since been superseded.
    #[error("conflict in collection '{collection}': document {doc_id} already has revision {revision}")]
    Conflict {
        collection: String,
        doc_id: u64,
        revision: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transaction failed and none of its writes became visible.
    #[error("transaction rolled back: {0}")]
    RolledBack(#[source] Box<ConfDbError>),

    /// The transaction failed and releasing its resources failed as well.
    #[error("transaction failed ({cause}) and rollback failed ({rollback})")]
    RollbackFailed {
        cause: Box<ConfDbError>,
        rollback: Box<ConfDbError>,
    },
}

impl ConfDbError {
    /// The error that started it all, looking through rollback wrappers.
    pub fn root_cause(&self) -> &ConfDbError {
        match self {
            ConfDbError::RolledBack(inner) => inner.root_cause(),
            ConfDbError::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.root_cause(), ConfDbError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), ConfDbError::NotFound(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self, ConfDbError::RolledBack(_))
    }
}

impl From<bincode::Error> for ConfDbError {
    fn from(err: bincode::Error) -> Self {
        ConfDbError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ConfDbError {
    fn from(err: serde_json::Error) -> Self {
        ConfDbError::Serialization(err.to_string())
    }
}

impl From<snap::Error> for ConfDbError {
    fn from(err: snap::Error) -> Self {
        ConfDbError::Corruption(format!("snappy: {}", err))
    }
}
