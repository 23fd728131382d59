use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::parser::RawItem;
use crate::storage::NewArticle;

/// Map raw items to articles for `feed_id`, preserving input order.
///
/// Items that end up without a GUID or without a link are dropped silently.
/// `now` is the timestamp used for items that carry neither a published nor
/// an updated date, so the same batch always normalizes the same way.
pub fn normalize_items(items: Vec<RawItem>, feed_id: i64, now: DateTime<Utc>) -> Vec<NewArticle> {
    items
        .into_iter()
        .filter_map(|item| normalize_item(item, feed_id, now))
        .collect()
}

fn normalize_item(item: RawItem, feed_id: i64, now: DateTime<Utc>) -> Option<NewArticle> {
    let url = non_empty(item.link.as_deref())?.to_string();
    let guid = resolve_guid(item.guid.as_deref(), Some(&url))?;
    let published_at = item.published.or(item.updated).unwrap_or(now);

    Some(NewArticle {
        feed_id,
        guid,
        title: sanitize(item.title.as_deref()),
        url,
        author: item.author.unwrap_or_default(),
        content: item.content.unwrap_or_default(),
        summary: sanitize(item.description.as_deref()),
        published_at,
    })
}

/// The native id when present, otherwise a hash of the link.
///
/// Returns `None` when neither is usable.
pub fn resolve_guid(native: Option<&str>, link: Option<&str>) -> Option<String> {
    if let Some(guid) = non_empty(native) {
        return Some(guid.to_string());
    }
    non_empty(link).map(guid_from_link)
}

/// Lowercase hex SHA-256 of the link
pub fn guid_from_link(link: &str) -> String {
    format!("{:x}", Sha256::digest(link.as_bytes()))
}

fn sanitize(text: Option<&str>) -> String {
    text.map(str::trim).unwrap_or_default().to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
