//! Detail page enrichment.

use std::collections::HashSet;

use scraper::{ElementRef, Html};

use crate::models::Listing;
use crate::traits::Fetcher;

/// Blocks this short or shorter are labels, not prose.
pub const MIN_BLOCK_CHARS: usize = 40;

/// Cap on candidate elements inspected per detail page.
pub const MAX_BLOCKS: usize = 80;

const BLOCK_TAGS: [&str; 3] = ["p", "div", "td"];
const CONTENT_ROOT_ID: &str = "MainBody";

/// Fetches detail pages and fills in `Listing::description`.
#[derive(Clone)]
pub struct DetailEnricher<F: Fetcher> {
    fetcher: F,
}

impl<F: Fetcher> DetailEnricher<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Return a copy of `listing` with its description populated.
    ///
    /// Never fails: on any fetch error the listing comes back unchanged.
    pub async fn enrich(&self, listing: &Listing) -> Listing {
        tracing::debug!(listing_id = %listing.id, url = %listing.detail_url, "Enriching listing");
        match self.fetcher.fetch(&listing.detail_url).await {
            Ok(html) => {
                let description = extract_description(&html);
                if description.is_none() {
                    tracing::debug!(listing_id = %listing.id, "Detail page had no narrative text");
                }
                listing.with_description(description)
            }
            Err(e) => {
                tracing::warn!(listing_id = %listing.id, error = %e, "Enrichment failed, keeping listing unenriched");
                listing.clone()
            }
        }
    }
}

/// Pull the narrative text blocks out of a detail page.
///
/// Looks inside `#MainBody` when present, otherwise the whole document.
/// Blocks of at most [`MIN_BLOCK_CHARS`] characters are dropped, as is any
/// block equal to, contained in, or containing one already kept, which
/// collapses text repeated by nested elements. The containment check is
/// quadratic in the number of kept blocks; [`MAX_BLOCKS`] keeps that bounded.
///
/// Returns `None` when nothing survives.
pub fn extract_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let root = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().id() == Some(CONTENT_ROOT_ID))
        .unwrap_or_else(|| document.root_element());

    let mut seen: HashSet<String> = HashSet::new();
    let mut parts: Vec<String> = Vec::new();

    // descendants() starts with the root itself
    let blocks = root
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|el| BLOCK_TAGS.contains(&el.value().name()))
        .take(MAX_BLOCKS);

    for block in blocks {
        let text = block_text(block);
        if text.chars().count() <= MIN_BLOCK_CHARS || seen.contains(&text) {
            continue;
        }
        if parts
            .iter()
            .any(|kept| kept.contains(text.as_str()) || text.contains(kept.as_str()))
        {
            continue;
        }
        seen.insert(text.clone());
        parts.push(text);
    }

    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Text nodes trimmed, empty ones dropped, joined by single spaces.
fn block_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
