use chrono::Utc;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleRow, NewArticle, StoreError};

/// Rows per INSERT statement. 10 binds per row keeps each statement far below
/// SQLite's bind-parameter limit.
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Article Ingestion
    // ========================================================================

    /// Insert articles, silently skipping any whose (`feed_id`, `guid`) pair
    /// already exists. Returns the number of rows actually inserted.
    ///
    /// The whole batch runs in one transaction: a failure other than the dedup
    /// conflict (for example an unknown `feed_id`) rolls back every chunk.
    /// An empty slice returns `Ok(0)` without touching the database.
    pub async fn insert_many_articles_ignore_duplicates(
        &self,
        articles: &[NewArticle],
    ) -> Result<usize, StoreError> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted: u64 = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO articles \
                 (feed_id, guid, title, url, author, content, summary, published_at, created_at, updated_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.feed_id)
                    .push_bind(&article.guid)
                    .push_bind(&article.title)
                    .push_bind(&article.url)
                    .push_bind(&article.author)
                    .push_bind(&article.content)
                    .push_bind(&article.summary)
                    .push_bind(article.published_at.timestamp())
                    .push_bind(now)
                    .push_bind(now);
            });

            builder.push(" ON CONFLICT(feed_id, guid) DO NOTHING");

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted as usize)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles from every feed `user_id` subscribes to, newest first.
    ///
    /// Ties on `published_at` are broken by id so consecutive pages never
    /// overlap. `limit` is passed through unchecked; SQLite treats a negative
    /// limit as "no limit".
    pub async fn get_user_subscribed_articles(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, StoreError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT a.id, a.feed_id, a.guid, a.title, a.url, a.author, a.content,
                   a.summary, a.published_at, a.created_at, a.updated_at
            FROM articles a
            JOIN feed_subscriptions fs ON a.feed_id = fs.feed_id
            WHERE fs.user_id = ?
            ORDER BY a.published_at DESC, a.id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleRow::into_article).collect())
    }

    /// Number of stored articles for a feed
    pub async fn count_articles_for_feed(&self, feed_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
