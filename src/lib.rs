//! Feed ingestion worker.
//!
//! Polls registered RSS, Atom and JSON feeds on a fixed interval and stores
//! their items so that each (feed, guid) pair exists exactly once, however
//! often or concurrently a feed is fetched.

pub mod config;
pub mod error;
pub mod feed;
pub mod shutdown;
pub mod storage;

pub use config::{Config, ConfigError};
pub use error::IngestError;
pub use feed::{FeedService, FeedSource, Fetcher, TickSummary, Worker};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use storage::Database;
