use chrono::Utc;

use super::schema::Database;
use super::types::{StoreError, Subscription, SubscriptionRow};

impl Database {
    /// Subscribe a user to a feed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if the user already subscribes to the feed
    /// - [`StoreError::Other`] if `feed_id` does not reference a feed
    pub async fn subscribe_user_to_feed(
        &self,
        user_id: i64,
        feed_id: i64,
        custom_title: &str,
    ) -> Result<Subscription, StoreError> {
        let now = Utc::now().timestamp();
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO feed_subscriptions (user_id, feed_id, custom_title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, user_id, feed_id, custom_title, created_at, updated_at
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(custom_title)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_insert)?;

        Ok(row.into_subscription())
    }

    /// Remove a subscription; [`StoreError::NotFound`] if there was none
    pub async fn delete_subscription(&self, user_id: i64, feed_id: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM feed_subscriptions WHERE user_id = ? AND feed_id = ?")
                .bind(user_id)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// A user's subscriptions, most recent first
    pub async fn get_subscriptions_by_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, feed_id, custom_title, created_at, updated_at
            FROM feed_subscriptions
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(SubscriptionRow::into_subscription)
            .collect())
    }

    pub async fn subscription_exists(&self, user_id: i64, feed_id: i64) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM feed_subscriptions WHERE user_id = ? AND feed_id = ?)",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
