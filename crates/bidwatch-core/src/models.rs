use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single solicitation as shown on the procurement portal.
///
/// Listings are values: enrichment and refreshes build new records through
/// the `with_*` methods instead of mutating fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Portal solicitation number, stable across crawls.
    pub id: String,
    pub title: String,
    pub agency: String,
    pub category: String,
    /// Lifecycle label (open, closed, awarded, ...).
    pub status: String,
    /// Absolute URL of the detail page. Secondary identity key.
    pub detail_url: String,
    /// Narrative text from the detail page. `None` until enriched.
    #[serde(default)]
    pub description: Option<String>,
}

impl Listing {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        agency: impl Into<String>,
        category: impl Into<String>,
        status: impl Into<String>,
        detail_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            agency: agency.into(),
            category: category.into(),
            status: status.into(),
            detail_url: detail_url.into(),
            description: None,
        }
    }

    /// Copy of this listing carrying the given description.
    pub fn with_description(&self, description: Option<String>) -> Self {
        Self {
            description,
            ..self.clone()
        }
    }

    /// Copy of `previous` with the structural fields of `self`.
    ///
    /// The description stored in `previous` is kept as-is.
    pub fn refreshed_from(&self, previous: &Listing) -> Self {
        Self {
            description: previous.description.clone(),
            ..self.clone()
        }
    }

    /// True when title or status differ from `other`.
    pub fn differs_in_content(&self, other: &Listing) -> bool {
        self.title != other.title || self.status != other.status
    }
}

/// Outcome of one successful sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Unique listings returned by the crawl.
    pub crawled: usize,
    /// Listings treated as new this run.
    pub new: usize,
    /// New listings that came back from enrichment with a description.
    pub enriched: usize,
    /// Listings handed to the notifier.
    pub forwarded: usize,
    /// Oracle calls that failed (those listings were not forwarded).
    pub oracle_failures: usize,
    /// Records in the persisted snapshot.
    pub snapshot_size: usize,
    /// Whether the notifier was invoked.
    pub delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Listing {
        Listing::new(
            "6100012345",
            "Network Upgrade",
            "General Services",
            "IT",
            "Open",
            "https://portal.test/Procurement_Details.aspx?id=6100012345",
        )
    }

    #[test]
    fn with_description_leaves_original_untouched() {
        let original = listing();
        let enriched = original.with_description(Some("Scope of work".into()));
        assert_eq!(original.description, None);
        assert_eq!(enriched.description.as_deref(), Some("Scope of work"));
        assert_eq!(enriched.id, original.id);
    }

    #[test]
    fn refreshed_keeps_previous_description() {
        let previous = listing().with_description(Some("old text".into()));
        let mut current = listing();
        current.status = "Closed".into();

        let refreshed = current.refreshed_from(&previous);
        assert_eq!(refreshed.status, "Closed");
        assert_eq!(refreshed.description.as_deref(), Some("old text"));
    }

    #[test]
    fn content_difference_ignores_description() {
        let a = listing();
        let b = listing().with_description(Some("text".into()));
        assert!(!a.differs_in_content(&b));

        let mut c = listing();
        c.title = "Renamed".into();
        assert!(a.differs_in_content(&c));
    }

    #[test]
    fn deserializes_without_description() {
        let json = r#"{"id":"1","title":"t","agency":"a","category":"IT","status":"Open","detail_url":"u"}"#;
        let parsed: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.description, None);
    }
}
