//! Error taxonomy for the harness.
//!
//! [`StoreError`] is what a backend reports; it is already classified so callers
//! can tell a dead connection from an idempotent DDL conflict from a bad query.
//! [`HarnessError`] wraps it with the remaining failure kinds of the harness.

use tokidx_core::{IdentifierError, IndexError, UnknownColumn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store cannot be reached; fatal for the whole run.
    #[error("{op}: cannot reach store: {message}")]
    Connectivity { op: String, message: String },
    /// Database, table or index already exists.
    #[error("{op}: {object} already exists: {message}")]
    AlreadyExists {
        op: String,
        object: String,
        message: String,
    },
    /// Any other statement failure (malformed SQL, missing object, ...).
    #[error("{op}: {message}")]
    Query { op: String, message: String },
}

impl StoreError {
    pub fn query(op: &str, message: impl ToString) -> Self {
        StoreError::Query {
            op: op.to_string(),
            message: message.to_string(),
        }
    }

    pub fn connectivity(op: &str, message: impl ToString) -> Self {
        StoreError::Connectivity {
            op: op.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connectivity { .. })
    }

    /// Re-label the operation, keeping the classification and store message.
    pub fn in_op(self, new_op: &str) -> Self {
        match self {
            StoreError::Connectivity { message, .. } => StoreError::Connectivity {
                op: new_op.to_string(),
                message,
            },
            StoreError::AlreadyExists {
                object, message, ..
            } => StoreError::AlreadyExists {
                op: new_op.to_string(),
                object,
                message,
            },
            StoreError::Query { message, .. } => StoreError::Query {
                op: new_op.to_string(),
                message,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Column(#[from] UnknownColumn),
    #[error("query template: {0}")]
    Template(String),
    #[error("bulk load aborted at batch {batch}: {source}")]
    Load {
        batch: usize,
        #[source]
        source: StoreError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("case file {path}: {source}")]
    CaseFile {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HarnessError {
    pub fn io(context: impl ToString, source: std::io::Error) -> Self {
        HarnessError::Io {
            context: context.to_string(),
            source,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        match self {
            HarnessError::Store(e) | HarnessError::Load { source: e, .. } => e.is_connectivity(),
            _ => false,
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
