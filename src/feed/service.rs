use chrono::Utc;
use std::time::Duration;

use super::fetcher::{FeedSource, Fetcher};
use super::normalize::normalize_items;
use crate::error::IngestError;
use crate::shutdown::Shutdown;
use crate::storage::{Article, Database, Feed, StoreError, Subscription};

/// Feed operations composed over the stores and a [`FeedSource`].
///
/// The worker drives [`FeedService::fetch_and_store_feed`]; everything else is
/// a thin passthrough for the account and API layers that sit above this crate.
pub struct FeedService<S = Fetcher> {
    db: Database,
    source: S,
}

impl<S: FeedSource> FeedService<S> {
    pub fn new(db: Database, source: S) -> Self {
        Self { db, source }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Run one ingestion unit for `feed`: claim, fetch, normalize, store.
    ///
    /// The claim is written before any network I/O and is not reverted when
    /// the fetch fails, so a broken feed is retried only at its next due time.
    /// Returns how many articles were new.
    pub async fn fetch_and_store_feed(
        &self,
        feed: &Feed,
        shutdown: &Shutdown,
    ) -> Result<usize, IngestError> {
        self.db.update_last_fetched_at(feed.id).await?;

        let items = self.source.fetch(&feed.feed_url, shutdown).await?;
        let fetched = items.len();

        let articles = normalize_items(items, feed.id, Utc::now());
        if articles.len() < fetched {
            tracing::debug!(
                feed_id = feed.id,
                skipped = fetched - articles.len(),
                "Skipped items without guid or link"
            );
        }

        let inserted = self
            .db
            .insert_many_articles_ignore_duplicates(&articles)
            .await?;
        Ok(inserted)
    }

    pub async fn get_next_feeds_to_fetch(
        &self,
        limit: usize,
        older_than: Duration,
    ) -> Result<Vec<Feed>, IngestError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.db.get_next_feeds_to_fetch(limit, older_than).await?)
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// Register a feed after checking that `feed_url` is an http(s) URL.
    pub async fn add_feed(
        &self,
        feed_url: &str,
        site_url: &str,
        title: &str,
        description: &str,
    ) -> Result<Feed, IngestError> {
        let feed_url = validate_feed_url(feed_url)?;
        Ok(self
            .db
            .add_feed(&feed_url, site_url, title, description)
            .await?)
    }

    pub async fn get_feed_by_id(&self, id: i64) -> Result<Feed, IngestError> {
        Ok(self.db.get_feed_by_id(id).await?)
    }

    pub async fn get_feed_by_url(&self, feed_url: &str) -> Result<Feed, IngestError> {
        Ok(self.db.get_feed_by_url(feed_url).await?)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, IngestError> {
        Ok(self.db.list_feeds().await?)
    }

    pub async fn update_feed_last_fetched_at(&self, id: i64) -> Result<(), IngestError> {
        Ok(self.db.update_last_fetched_at(id).await?)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe `user_id` to an existing feed.
    ///
    /// A missing or blank `custom_title` falls back to the feed's own title.
    pub async fn subscribe_to_feed(
        &self,
        user_id: i64,
        feed_id: i64,
        custom_title: Option<&str>,
    ) -> Result<Subscription, IngestError> {
        let feed = self.db.get_feed_by_id(feed_id).await?;
        let title = custom_title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(feed.title.as_str());

        self.db
            .subscribe_user_to_feed(user_id, feed_id, title)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => IngestError::AlreadySubscribed,
                other => other.into(),
            })
    }

    pub async fn unsubscribe_from_feed(&self, user_id: i64, feed_id: i64) -> Result<(), IngestError> {
        Ok(self.db.delete_subscription(user_id, feed_id).await?)
    }

    pub async fn list_user_subscriptions(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, IngestError> {
        Ok(self.db.get_subscriptions_by_user(user_id).await?)
    }

    pub async fn is_subscribed(&self, user_id: i64, feed_id: i64) -> Result<bool, IngestError> {
        Ok(self.db.subscription_exists(user_id, feed_id).await?)
    }

    /// Page through the articles of every feed `user_id` subscribes to, newest first
    pub async fn fetch_user_subscribed_feeds(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Article>, IngestError> {
        Ok(self
            .db
            .get_user_subscribed_articles(user_id, offset, limit)
            .await?)
    }
}

fn validate_feed_url(raw: &str) -> Result<String, IngestError> {
    let trimmed = raw.trim();
    let parsed =
        url::Url::parse(trimmed).map_err(|e| IngestError::InvalidUrl(format!("{trimmed}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        scheme => Err(IngestError::InvalidUrl(format!(
            "{trimmed}: unsupported scheme '{scheme}'"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feed::{guid_from_link, FetchError, RawItem};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves canned items per URL; unknown URLs fail with HTTP 404
    #[derive(Default)]
    pub(crate) struct StubSource {
        responses: Mutex<HashMap<String, Vec<RawItem>>>,
        pub(crate) calls: AtomicUsize,
    }

    impl StubSource {
        pub(crate) fn with(self, url: &str, items: Vec<RawItem>) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), items);
            self
        }
    }

    #[async_trait]
    impl FeedSource for StubSource {
        async fn fetch(&self, url: &str, _shutdown: &Shutdown) -> Result<Vec<RawItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(FetchError::HttpStatus(404))
        }
    }

    pub(crate) fn raw(guid: Option<&str>, link: Option<&str>) -> RawItem {
        RawItem {
            guid: guid.map(String::from),
            link: link.map(String::from),
            title: Some("Title".to_string()),
            ..RawItem::default()
        }
    }

    async fn service(source: StubSource) -> FeedService<StubSource> {
        let db = Database::open(":memory:").await.unwrap();
        FeedService::new(db, source)
    }

    #[tokio::test]
    async fn test_fetch_and_store_two_items_is_idempotent() {
        let source = StubSource::default().with(
            "http://x/feed",
            vec![
                raw(Some("a1"), Some("http://x/a")),
                raw(None, Some("http://x/b")),
            ],
        );
        let svc = service(source).await;
        let feed = svc.add_feed("http://x/feed", "", "X", "").await.unwrap();

        let first = svc
            .fetch_and_store_feed(&feed, &Shutdown::never())
            .await
            .unwrap();
        let second = svc
            .fetch_and_store_feed(&feed, &Shutdown::never())
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);
        assert_eq!(svc.database().count_articles_for_feed(feed.id).await.unwrap(), 2);

        svc.subscribe_to_feed(1, feed.id, None).await.unwrap();
        let guids: Vec<String> = svc
            .fetch_user_subscribed_feeds(1, 0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.guid)
            .collect();
        assert!(guids.contains(&"a1".to_string()));
        assert!(guids.contains(&guid_from_link("http://x/b")));
    }

    #[tokio::test]
    async fn test_failed_fetch_still_claims_feed() {
        let svc = service(StubSource::default()).await;
        let feed = svc.add_feed("http://x/missing", "", "X", "").await.unwrap();
        assert!(feed.last_fetched_at.is_none());

        let err = svc
            .fetch_and_store_feed(&feed, &Shutdown::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::FeedUnavailable(FetchError::HttpStatus(404))
        ));

        let reloaded = svc.get_feed_by_id(feed.id).await.unwrap();
        assert!(reloaded.last_fetched_at.is_some());
        assert_eq!(svc.database().count_articles_for_feed(feed.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_feed_succeeds_with_zero() {
        let svc = service(StubSource::default().with("http://x/empty", vec![])).await;
        let feed = svc.add_feed("http://x/empty", "", "X", "").await.unwrap();

        let inserted = svc
            .fetch_and_store_feed(&feed, &Shutdown::never())
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn test_unusable_items_are_skipped() {
        let source = StubSource::default().with(
            "http://x/feed",
            vec![raw(Some("a1"), None), raw(Some("a2"), Some("http://x/2"))],
        );
        let svc = service(source).await;
        let feed = svc.add_feed("http://x/feed", "", "X", "").await.unwrap();

        let inserted = svc
            .fetch_and_store_feed(&feed, &Shutdown::never())
            .await
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_unknown_feed_aborts_before_fetch() {
        let source = StubSource::default();
        let svc = service(source).await;
        let feed = svc.add_feed("http://x/feed", "", "X", "").await.unwrap();
        let ghost = Feed { id: feed.id + 100, ..feed };

        let err = svc
            .fetch_and_store_feed(&ghost, &Shutdown::never())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound));
        assert_eq!(svc.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_add_feed_rejects_bad_urls() {
        let svc = service(StubSource::default()).await;

        for bad in ["not a url", "ftp://x/feed", "file:///etc/passwd", ""] {
            let err = svc.add_feed(bad, "", "", "").await.unwrap_err();
            assert!(matches!(err, IngestError::InvalidUrl(_)), "{bad}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_add_feed_duplicate_is_tagged() {
        let svc = service(StubSource::default()).await;
        svc.add_feed("https://x/feed", "", "", "").await.unwrap();

        let err = svc.add_feed("https://x/feed", "", "", "").await.unwrap_err();
        assert!(matches!(err, IngestError::FeedAlreadyExists));
    }

    #[tokio::test]
    async fn test_subscribe_defaults_title_and_rejects_duplicates() {
        let svc = service(StubSource::default()).await;
        let feed = svc
            .add_feed("https://x/feed", "", "Feed Title", "")
            .await
            .unwrap();

        let sub = svc.subscribe_to_feed(9, feed.id, Some("  ")).await.unwrap();
        assert_eq!(sub.custom_title, "Feed Title");

        let err = svc
            .subscribe_to_feed(9, feed.id, Some("Mine"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AlreadySubscribed));

        let subs = svc.list_user_subscriptions(9).await.unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_keeps_custom_title() {
        let svc = service(StubSource::default()).await;
        let feed = svc.add_feed("https://x/feed", "", "Feed", "").await.unwrap();

        let sub = svc.subscribe_to_feed(3, feed.id, Some("Mine")).await.unwrap();
        assert_eq!(sub.custom_title, "Mine");
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_feed() {
        let svc = service(StubSource::default()).await;
        let err = svc.subscribe_to_feed(1, 42, None).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let svc = service(StubSource::default()).await;
        let feed = svc.add_feed("https://x/feed", "", "Feed", "").await.unwrap();
        svc.subscribe_to_feed(1, feed.id, None).await.unwrap();

        assert!(svc.is_subscribed(1, feed.id).await.unwrap());
        assert!(!svc.is_subscribed(2, feed.id).await.unwrap());

        svc.unsubscribe_from_feed(1, feed.id).await.unwrap();
        assert!(!svc.is_subscribed(1, feed.id).await.unwrap());
        let err = svc.unsubscribe_from_feed(1, feed.id).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound));
    }
}
