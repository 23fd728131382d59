use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors.
///
/// `NotFound` and `AlreadyExists` are expected conditions that callers match
/// on; everything else is an unexpected database failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The targeted row does not exist (lookup miss or zero rows affected)
    #[error("Record not found")]
    NotFound,

    /// A unique constraint other than the article dedup key rejected the write
    #[error("Record already exists")]
    AlreadyExists,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Map a sqlx error from an INSERT, turning unique violations into
    /// [`StoreError::AlreadyExists`].
    pub(crate) fn from_insert(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::AlreadyExists
            }
            _ => StoreError::Other(err),
        }
    }
}

/// Convert stored Unix seconds back into a UTC timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (timestamps as Unix seconds)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub feed_url: String,
    pub site_url: String,
    pub title: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            feed_url: self.feed_url,
            site_url: self.site_url,
            title: self.title,
            description: self.description,
            created_at: from_unix(self.created_at),
            updated_at: from_unix(self.updated_at),
            last_fetched_at: self.last_fetched_at.map(from_unix),
        }
    }
}

/// Internal row type for article queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub summary: String,
    pub published_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ArticleRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: self.title,
            url: self.url,
            author: self.author,
            content: self.content,
            summary: self.summary,
            published_at: from_unix(self.published_at),
            created_at: from_unix(self.created_at),
            updated_at: from_unix(self.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub custom_title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SubscriptionRow {
    pub(crate) fn into_subscription(self) -> Subscription {
        Subscription {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            custom_title: self.custom_title,
            created_at: from_unix(self.created_at),
            updated_at: from_unix(self.updated_at),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed.
///
/// `last_fetched_at` is the claim timestamp: `None` means the feed was never
/// attempted. Once set it never moves backwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub feed_url: String,
    pub site_url: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// A normalized article ready for insertion.
///
/// Produced by the normalizer; `guid` and `url` are always non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
}

/// A stored article. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's subscription to a feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub custom_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
