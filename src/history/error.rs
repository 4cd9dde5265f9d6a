use thiserror::Error;

use crate::domain::ResourceId;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("invalid history configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("sequence {sequence} for {resource_type}/{resource_id} was taken by a concurrent writer")]
    Conflict {
        resource_type: String,
        resource_id: ResourceId,
        sequence: u64,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("history is not enabled for resource type {0}")]
    Untracked(String),
    #[error("datastore error: {0}")]
    Store(#[from] StoreError),
}

impl HistoryError {
    /// Whether retrying the whole operation in a fresh transaction can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;
