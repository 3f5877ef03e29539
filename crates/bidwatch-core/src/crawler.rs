//! Page-by-page walk over the portal's stateful results grid.
//!
//! The grid has no page URLs. Page N is reached by posting back the hidden
//! form state of a page that was already fetched, with the event argument
//! `Page$N`. The pager only shows a sliding window of page numbers, so the
//! set of pages to visit grows as the walk proceeds.

use std::collections::{BTreeSet, HashMap};

use crate::config::PortalConfig;
use crate::error::AppError;
use crate::extract::{ListingExtractor, ParsedPage};
use crate::form_state::FormState;
use crate::models::Listing;
use crate::traits::Fetcher;

/// Walk state threaded from one page to the next.
#[derive(Debug, Clone)]
pub struct CrawlState {
    /// Hidden fields of the most recently fetched page.
    pub form: FormState,
    pub visited: BTreeSet<u32>,
    /// Pages seen in some pager but not fetched yet.
    pub frontier: BTreeSet<u32>,
    /// Listings in discovery order, duplicates included.
    pub listings: Vec<Listing>,
}

impl CrawlState {
    /// Seed the walk with the page returned by the initial GET.
    pub fn start(first: ParsedPage) -> Self {
        let mut state = Self {
            form: FormState::new(),
            visited: BTreeSet::new(),
            frontier: BTreeSet::new(),
            listings: Vec::new(),
        };
        let current = first.pager.current;
        state.absorb(current, first);
        state
    }

    /// Record a fetched page: mark it visited, queue newly revealed page
    /// numbers and make its form state the one used for the next postback.
    /// A page without view-state fields leaves the carried form in place.
    pub fn absorb(&mut self, requested: u32, page: ParsedPage) {
        self.visited.insert(requested);
        self.visited.insert(page.pager.current);
        self.frontier.retain(|p| !self.visited.contains(p));
        for linked in page.pager.linked {
            if !self.visited.contains(&linked) {
                self.frontier.insert(linked);
            }
        }
        self.listings.extend(page.listings);
        if page.form.has_page_state() || !self.form.has_page_state() {
            self.form = page.form;
        } else {
            tracing::debug!(page = requested, "No view state on page, keeping previous form");
        }
    }

    /// Lowest unvisited page still reachable, if any.
    pub fn next_page(&mut self) -> Option<u32> {
        while let Some(page) = self.frontier.pop_first() {
            if !self.visited.contains(&page) {
                return Some(page);
            }
        }
        None
    }
}

/// Enumerates every listing of the portal's result set.
#[derive(Clone)]
pub struct PaginationCrawler<F: Fetcher> {
    fetcher: F,
    extractor: ListingExtractor,
    config: PortalConfig,
}

impl<F: Fetcher> PaginationCrawler<F> {
    pub fn new(fetcher: F, config: PortalConfig) -> Result<Self, AppError> {
        let extractor = ListingExtractor::new(&config)?;
        Ok(Self {
            fetcher,
            extractor,
            config,
        })
    }

    /// Fetch all pages and return unique listings in discovery order.
    ///
    /// Any failed request aborts the crawl. A page without a results table
    /// contributes no listings but its pager is still followed.
    pub async fn crawl(&self) -> Result<Vec<Listing>, AppError> {
        let base_url = &self.config.base_url;

        tracing::info!(url = %base_url, "Fetching first results page");
        let html = self.fetcher.fetch(base_url).await?;
        let first = self.extractor.parse_page(&html);
        tracing::info!(
            page = first.pager.current,
            links = ?first.pager.linked,
            listings = first.listings.len(),
            "Parsed results page"
        );

        let mut state = CrawlState::start(first);

        while let Some(page) = state.next_page() {
            if state.visited.len() >= self.config.max_pages {
                tracing::warn!(
                    max_pages = self.config.max_pages,
                    remaining = state.frontier.len() + 1,
                    "Page cap reached, stopping crawl early"
                );
                break;
            }

            let form = state.form.for_page(&self.config.grid_event_target, page);
            tracing::debug!(page, fields = form.len(), "Posting back for page");
            let html = self.fetcher.post_form(base_url, &form).await?;

            let parsed = self.extractor.parse_page(&html);
            tracing::info!(
                page,
                links = ?parsed.pager.linked,
                listings = parsed.listings.len(),
                "Parsed results page"
            );
            state.absorb(page, parsed);
        }

        let pages = state.visited.len();
        let mut listings = dedupe_by_id(state.listings);
        if let Some(category) = &self.config.category_filter {
            let before = listings.len();
            listings.retain(|l| l.category.trim().eq_ignore_ascii_case(category.trim()));
            tracing::debug!(%category, kept = listings.len(), dropped = before - listings.len(), "Category filter applied");
        }

        tracing::info!(pages, total = listings.len(), "Crawl complete");
        Ok(listings)
    }
}

/// Collapse repeated ids: first position wins, last record wins.
pub fn dedupe_by_id(listings: Vec<Listing>) -> Vec<Listing> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Listing> = Vec::with_capacity(listings.len());

    for listing in listings {
        match positions.get(&listing.id) {
            Some(&index) => unique[index] = listing,
            None => {
                positions.insert(listing.id.clone(), unique.len());
                unique.push(listing);
            }
        }
    }

    unique
}
