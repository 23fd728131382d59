use thiserror::Error;

use crate::feed::FetchError;
use crate::storage::StoreError;

/// Errors surfaced by the feed service.
///
/// Callers branch on the variant, never on the message.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Transient fetch or parse failure; the feed is retried at its next due time
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(#[from] FetchError),

    #[error("Feed already exists")]
    FeedAlreadyExists,

    #[error("Not found")]
    NotFound,

    #[error("Already subscribed to this feed")]
    AlreadySubscribed,

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    /// Storage failure unrelated to the dedup key
    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => IngestError::NotFound,
            StoreError::AlreadyExists => IngestError::FeedAlreadyExists,
            other => IngestError::Storage(other),
        }
    }
}

impl IngestError {
    /// True for failures that resolve themselves at the next scheduled attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::FeedUnavailable(_))
    }
}
