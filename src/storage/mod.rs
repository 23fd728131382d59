mod articles;
mod feeds;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{Article, Feed, NewArticle, StoreError, Subscription};
