use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser::{self, ParseFeedError};

/// A feed item as found in the document, before normalization.
///
/// Every field is optional: RSS, Atom and JSON Feed disagree on what an item
/// must carry, and the normalizer decides what is usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    /// Native unique identifier (`<guid>`, Atom `<id>`, JSON `id`)
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Parse an RSS, Atom or JSON Feed document into raw items, in document order.
///
/// Items without a native id keep `guid: None`; the normalizer derives one
/// from the link instead of trusting the parser's synthetic id.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<RawItem>, ParseFeedError> {
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    Ok(feed.entries.into_iter().map(RawItem::from).collect())
}

impl From<Entry> for RawItem {
    fn from(entry: Entry) -> Self {
        let link = primary_link(&entry.links).map(|l| l.href.clone());
        let guid = if entry.id.trim().is_empty() {
            None
        } else {
            Some(entry.id)
        };

        RawItem {
            guid,
            link,
            title: entry.title.map(|t| t.content),
            description: entry.summary.map(|s| s.content),
            content: entry.content.and_then(|c| c.body),
            author: entry.authors.into_iter().next().map(|p| p.name),
            published: entry.published,
            updated: entry.updated,
        }
    }
}

/// The item's own page: the first `alternate` (or rel-less) link, else the first link
fn primary_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
}
