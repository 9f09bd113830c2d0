//! Paginated entity responses and the query that requests them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a paginated entity listing.
///
/// The cursor is opaque to the client and scoped to a single pull:
/// cursors are never persisted, every pull restarts from the first page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPage<T> {
    /// Records created or modified on the server.
    pub items: Vec<T>,
    /// IDs of records deleted on the server since the filter timestamp.
    #[serde(default)]
    pub deleted_ids: Vec<String>,
    /// Cursor for the next page, when `has_more` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Whether another page exists.
    pub has_more: bool,
}

impl<T> EntityPage<T> {
    /// A page with no items, no deletions, and no further pages.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            deleted_ids: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    /// A single final page containing `items`.
    pub fn of(items: Vec<T>) -> Self {
        Self {
            items,
            deleted_ids: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    /// Attaches server-side deletions to the page.
    pub fn with_deleted(mut self, deleted_ids: Vec<String>) -> Self {
        self.deleted_ids = deleted_ids;
        self
    }

    /// Splits `items` into pages of at most `limit`, chaining cursors.
    ///
    /// Cursors are the zero-based index of the next page, which is all a
    /// test server needs. An empty input yields one empty page.
    pub fn paginate(items: Vec<T>, limit: usize) -> Vec<Self> {
        if items.is_empty() {
            return vec![Self::empty()];
        }

        let mut pages: Vec<Self> = Vec::new();
        let mut chunk: Vec<T> = Vec::new();
        for item in items {
            chunk.push(item);
            if chunk.len() == limit {
                pages.push(Self::of(std::mem::take(&mut chunk)));
            }
        }
        if !chunk.is_empty() {
            pages.push(Self::of(chunk));
        }

        let total = pages.len();
        for (index, page) in pages.iter_mut().enumerate() {
            if index + 1 < total {
                page.has_more = true;
                page.next_cursor = Some((index + 1).to_string());
            }
        }
        pages
    }
}

/// Query parameters for one page request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// Maximum number of items per page.
    pub limit: u32,
    /// Cursor from the previous page, absent for the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Delta filter: only records modified after this instant.
    /// Absent means full sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
}

impl PageQuery {
    /// First-page query with no delta filter (full sync).
    pub fn full(limit: u32) -> Self {
        Self {
            limit,
            cursor: None,
            updated_after: None,
        }
    }

    /// First-page query, delta-filtered when a checkpoint exists.
    pub fn delta(limit: u32, updated_after: Option<DateTime<Utc>>) -> Self {
        Self {
            limit,
            cursor: None,
            updated_after,
        }
    }

    /// The query for the page after this one.
    pub fn next(&self, cursor: String) -> Self {
        Self {
            limit: self.limit,
            cursor: Some(cursor),
            updated_after: self.updated_after,
        }
    }

    /// Whether this query carries a delta filter.
    pub fn is_delta(&self) -> bool {
        self.updated_after.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn paginate_splits_and_chains() {
        let pages = EntityPage::paginate((0..100).collect::<Vec<_>>(), 60);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].items.len(), 60);
        assert!(pages[0].has_more);
        assert_eq!(pages[0].next_cursor.as_deref(), Some("1"));
        assert_eq!(pages[1].items.len(), 40);
        assert!(!pages[1].has_more);
        assert_eq!(pages[1].next_cursor, None);
    }

    #[test]
    fn paginate_exact_multiple() {
        let pages = EntityPage::paginate((0..120).collect::<Vec<_>>(), 60);
        assert_eq!(pages.len(), 2);
        assert!(!pages[1].has_more);
    }

    #[test]
    fn paginate_empty_input() {
        let pages = EntityPage::<u32>::paginate(vec![], 60);
        assert_eq!(pages.len(), 1);
        assert!(pages[0].items.is_empty());
        assert!(!pages[0].has_more);
    }

    #[test]
    fn query_next_keeps_filter() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = PageQuery::delta(60, Some(t));
        assert!(first.is_delta());
        assert_eq!(first.cursor, None);

        let second = first.next("1".into());
        assert_eq!(second.cursor.as_deref(), Some("1"));
        assert_eq!(second.updated_after, Some(t));
        assert_eq!(second.limit, 60);
    }

    #[test]
    fn page_serializes_camel_case() {
        let page = EntityPage::of(vec!["a".to_string()]).with_deleted(vec!["gone".into()]);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["deletedIds"][0], "gone");
        assert_eq!(json["hasMore"], false);
        assert!(json.get("nextCursor").is_none());
    }

    #[test]
    fn page_deserializes_missing_deleted_ids() {
        let json = r#"{"items":[],"hasMore":false}"#;
        let page: EntityPage<String> = serde_json::from_str(json).unwrap();
        assert!(page.deleted_ids.is_empty());
    }
}
