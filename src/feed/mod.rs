//! Feed ingestion: fetching, parsing, normalization and scheduling.
//!
//! - [`parser`] - feed documents to [`RawItem`]s using the `feed-rs` crate
//! - [`fetcher`] - bounded HTTP retrieval behind the [`FeedSource`] trait
//! - [`normalize`] - [`RawItem`]s to storable articles (GUID and timestamp resolution)
//! - [`service`] - the ingestion unit plus feed and subscription passthroughs
//! - [`worker`] - periodic scheduler with bounded fan-out
//!
//! # Example
//!
//! ```ignore
//! let source = Fetcher::new(config.fetch_timeout(), config.max_feed_bytes, &config.user_agent)?;
//! let service = Arc::new(FeedService::new(db, source));
//! let worker = Worker::new(service, config.poll_interval(), config.concurrency);
//! worker.start(shutdown).await;
//! ```

pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod service;
pub mod worker;

pub use fetcher::{
    FeedSource, FetchError, Fetcher, DEFAULT_MAX_FEED_SIZE, DEFAULT_USER_AGENT, MAX_FETCH_TIMEOUT,
};
pub use normalize::{guid_from_link, normalize_items};
pub use parser::{parse_feed, RawItem};
pub use service::FeedService;
pub use worker::{TickSummary, Worker};
