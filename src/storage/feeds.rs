use chrono::Utc;
use std::time::Duration;

use super::schema::Database;
use super::types::{Feed, FeedRow, StoreError};

const FEED_COLUMNS: &str =
    "id, feed_url, site_url, title, description, created_at, updated_at, last_fetched_at";

impl Database {
    // ========================================================================
    // Feed Registration
    // ========================================================================

    /// Register a new feed.
    ///
    /// Duplicate detection relies on the UNIQUE constraint on `feed_url`, so two
    /// concurrent registrations of the same URL cannot both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if `feed_url` is already registered.
    pub async fn add_feed(
        &self,
        feed_url: &str,
        site_url: &str,
        title: &str,
        description: &str,
    ) -> Result<Feed, StoreError> {
        let now = Utc::now().timestamp();
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            INSERT INTO feeds (feed_url, site_url, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(feed_url)
        .bind(site_url)
        .bind(title)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        Ok(row.into_feed())
    }

    // ========================================================================
    // Feed Lookups
    // ========================================================================

    pub async fn get_feed_by_id(&self, id: i64) -> Result<Feed, StoreError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedRow::into_feed).ok_or(StoreError::NotFound)
    }

    pub async fn get_feed_by_url(&self, feed_url: &str) -> Result<Feed, StoreError> {
        let row = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE feed_url = ?"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedRow::into_feed).ok_or(StoreError::NotFound)
    }

    /// All registered feeds, ordered by title
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY title, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    // ========================================================================
    // Due Selection and Claim
    // ========================================================================

    /// Return up to `limit` feeds that are due for ingestion.
    ///
    /// A feed is due when it was never claimed or its last claim is strictly
    /// older than `now - older_than`. Never-fetched feeds come first, then the
    /// stalest claims.
    pub async fn get_next_feeds_to_fetch(
        &self,
        limit: i64,
        older_than: Duration,
    ) -> Result<Vec<Feed>, StoreError> {
        let older_than = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(older_than);

        let rows = sqlx::query_as::<_, FeedRow>(&format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds
            WHERE last_fetched_at IS NULL OR last_fetched_at < ?
            ORDER BY last_fetched_at IS NOT NULL, last_fetched_at ASC, id ASC
            LIMIT ?
        "#
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    /// Claim a feed by advancing `last_fetched_at` to now.
    ///
    /// The timestamp never moves backwards: if the stored claim is ahead of the
    /// local clock it is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no feed has this id.
    pub async fn update_last_fetched_at(&self, id: i64) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = MAX(COALESCE(last_fetched_at, 0), ?),
                updated_at = ?
            WHERE id = ?
        "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, StoreError};
    use chrono::Utc;
    use std::time::Duration;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn set_last_fetched(db: &Database, id: i64, value: Option<i64>) {
        sqlx::query("UPDATE feeds SET last_fetched_at = ? WHERE id = ?")
            .bind(value)
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_feed_returns_record() {
        let db = test_db().await;
        let feed = db
            .add_feed(
                "https://example.com/rss",
                "https://example.com",
                "Example",
                "An example feed",
            )
            .await
            .unwrap();

        assert!(feed.id > 0);
        assert_eq!(feed.feed_url, "https://example.com/rss");
        assert_eq!(feed.site_url, "https://example.com");
        assert_eq!(feed.title, "Example");
        assert_eq!(feed.description, "An example feed");
        assert!(feed.last_fetched_at.is_none());
    }

    #[tokio::test]
    async fn test_add_feed_duplicate_url_rejected() {
        let db = test_db().await;
        db.add_feed("https://example.com/rss", "", "First", "")
            .await
            .unwrap();

        let err = db
            .add_feed("https://example.com/rss", "", "Second", "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));

        let feeds = db.list_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "First");
    }

    #[tokio::test]
    async fn test_get_feed_by_id_and_url() {
        let db = test_db().await;
        let feed = db
            .add_feed("https://example.com/rss", "", "Example", "")
            .await
            .unwrap();

        assert_eq!(db.get_feed_by_id(feed.id).await.unwrap(), feed);
        assert_eq!(
            db.get_feed_by_url("https://example.com/rss").await.unwrap(),
            feed
        );
    }

    #[tokio::test]
    async fn test_get_feed_missing_is_not_found() {
        let db = test_db().await;
        assert!(matches!(
            db.get_feed_by_id(42).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.get_feed_by_url("https://nowhere.example/rss").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_feeds_ordered_by_title() {
        let db = test_db().await;
        db.add_feed("https://b.example/rss", "", "Beta", "")
            .await
            .unwrap();
        db.add_feed("https://a.example/rss", "", "Alpha", "")
            .await
            .unwrap();

        let titles: Vec<String> = db
            .list_feeds()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }

    #[tokio::test]
    async fn test_update_last_fetched_at_sets_claim() {
        let db = test_db().await;
        let feed = db
            .add_feed("https://example.com/rss", "", "Example", "")
            .await
            .unwrap();

        let before = Utc::now().timestamp();
        db.update_last_fetched_at(feed.id).await.unwrap();

        let claimed = db.get_feed_by_id(feed.id).await.unwrap();
        let last = claimed.last_fetched_at.unwrap().timestamp();
        assert!(last >= before);
        assert!(claimed.updated_at.timestamp() >= before);
    }

    #[tokio::test]
    async fn test_update_last_fetched_at_never_moves_backwards() {
        let db = test_db().await;
        let feed = db
            .add_feed("https://example.com/rss", "", "Example", "")
            .await
            .unwrap();

        let future = Utc::now().timestamp() + 3600;
        set_last_fetched(&db, feed.id, Some(future)).await;

        db.update_last_fetched_at(feed.id).await.unwrap();

        let claimed = db.get_feed_by_id(feed.id).await.unwrap();
        assert_eq!(claimed.last_fetched_at.unwrap().timestamp(), future);
    }

    #[tokio::test]
    async fn test_update_last_fetched_at_unknown_feed() {
        let db = test_db().await;
        assert!(matches!(
            db.update_last_fetched_at(999).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_due_selection_respects_interval() {
        let db = test_db().await;
        let fresh = db
            .add_feed("https://fresh.example/rss", "", "Fresh", "")
            .await
            .unwrap();
        let stale = db
            .add_feed("https://stale.example/rss", "", "Stale", "")
            .await
            .unwrap();
        let never = db
            .add_feed("https://never.example/rss", "", "Never", "")
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        set_last_fetched(&db, fresh.id, Some(now - 5)).await;
        set_last_fetched(&db, stale.id, Some(now - 15)).await;

        let due = db
            .get_next_feeds_to_fetch(10, Duration::from_secs(10))
            .await
            .unwrap();
        let ids: Vec<i64> = due.iter().map(|f| f.id).collect();

        assert!(!ids.contains(&fresh.id), "claimed 5s ago is not due");
        assert!(ids.contains(&stale.id), "claimed 15s ago is due");
        assert!(ids.contains(&never.id), "never claimed is due");
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_exactly_at_cutoff_is_not_due() {
        let db = test_db().await;
        let feed = db
            .add_feed("https://edge.example/rss", "", "Edge", "")
            .await
            .unwrap();

        // Retry until set and select happen within the same wall-clock second
        loop {
            let now = Utc::now().timestamp();
            set_last_fetched(&db, feed.id, Some(now - 10)).await;
            let due = db
                .get_next_feeds_to_fetch(10, Duration::from_secs(10))
                .await
                .unwrap();
            if Utc::now().timestamp() == now {
                assert!(due.is_empty(), "cutoff comparison is strict");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_due_selection_orders_never_fetched_first() {
        let db = test_db().await;
        let old = db
            .add_feed("https://old.example/rss", "", "Old", "")
            .await
            .unwrap();
        let older = db
            .add_feed("https://older.example/rss", "", "Older", "")
            .await
            .unwrap();
        let never = db
            .add_feed("https://never.example/rss", "", "Never", "")
            .await
            .unwrap();

        let now = Utc::now().timestamp();
        set_last_fetched(&db, old.id, Some(now - 100)).await;
        set_last_fetched(&db, older.id, Some(now - 200)).await;

        let due = db
            .get_next_feeds_to_fetch(10, Duration::from_secs(10))
            .await
            .unwrap();
        let ids: Vec<i64> = due.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![never.id, older.id, old.id]);
    }

    #[tokio::test]
    async fn test_due_selection_honours_limit() {
        let db = test_db().await;
        for i in 0..5 {
            db.add_feed(&format!("https://feed{}.example/rss", i), "", "", "")
                .await
                .unwrap();
        }

        let due = db
            .get_next_feeds_to_fetch(3, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn test_claimed_feed_is_no_longer_due() {
        let db = test_db().await;
        let feed = db
            .add_feed("https://example.com/rss", "", "Example", "")
            .await
            .unwrap();

        db.update_last_fetched_at(feed.id).await.unwrap();

        let due = db
            .get_next_feeds_to_fetch(10, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(due.is_empty());
    }
}
