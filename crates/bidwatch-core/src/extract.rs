//! Listing and pager extraction from a rendered results page.

use std::collections::BTreeSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::PortalConfig;
use crate::error::AppError;
use crate::form_state::FormState;
use crate::models::Listing;

const ID_COLUMN: usize = 0;
const TITLE_COLUMN: usize = 1;
const AGENCY_COLUMN: usize = 2;
const CATEGORY_COLUMN: usize = 3;
const STATUS_COLUMN: usize = 5;

/// Page numbers the pager currently exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerState {
    /// Page the server says it rendered.
    pub current: u32,
    /// Pages rendered as links (a sliding window, not the full range).
    pub linked: BTreeSet<u32>,
}

impl Default for PagerState {
    fn default() -> Self {
        Self {
            current: 1,
            linked: BTreeSet::new(),
        }
    }
}

/// Everything the crawler needs from one fetched page.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub listings: Vec<Listing>,
    pub pager: PagerState,
    pub form: FormState,
}

/// Parses results pages of the portal's grid.
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    base_url: Url,
    detail_path_marker: String,
    min_columns: usize,
    table: Selector,
    row: Selector,
    cell: Selector,
    anchor: Selector,
    pager_row: Selector,
    span: Selector,
}

impl ListingExtractor {
    pub fn new(config: &PortalConfig) -> Result<Self, AppError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid base URL '{}': {e}", config.base_url)))?;

        Ok(Self {
            base_url,
            detail_path_marker: config.detail_path_marker.clone(),
            // every column read below must exist
            min_columns: config.min_columns.max(STATUS_COLUMN + 1),
            table: compile(&format!("table#{}", config.grid_table_id))?,
            row: compile("tr")?,
            cell: compile("td")?,
            anchor: compile("a")?,
            pager_row: compile(&format!("tr.{}", config.pager_row_class))?,
            span: compile("span")?,
        })
    }

    /// Parse listings, pager and hidden form state in one pass over the page.
    pub fn parse_page(&self, html: &str) -> ParsedPage {
        let document = Html::parse_document(html);
        ParsedPage {
            listings: self.listings_in(&document),
            pager: self.pager_in(&document),
            form: FormState::from_document(&document),
        }
    }

    /// Listings in table row order. Rows that are not listings are skipped.
    pub fn extract_listings(&self, html: &str) -> Vec<Listing> {
        self.listings_in(&Html::parse_document(html))
    }

    pub fn read_pager(&self, html: &str) -> PagerState {
        self.pager_in(&Html::parse_document(html))
    }

    fn listings_in(&self, document: &Html) -> Vec<Listing> {
        let Some(table) = document.select(&self.table).next() else {
            tracing::warn!("Listings table not found");
            return Vec::new();
        };

        table
            .select(&self.row)
            .filter_map(|row| self.listing_from_row(row))
            .collect()
    }

    fn listing_from_row(&self, row: ElementRef<'_>) -> Option<Listing> {
        let cells: Vec<ElementRef<'_>> = row.select(&self.cell).collect();
        if cells.len() < self.min_columns {
            return None;
        }

        let link = cells[TITLE_COLUMN].select(&self.anchor).next()?;
        let href = link.value().attr("href")?.trim();
        if href.is_empty()
            || href.to_ascii_lowercase().starts_with("javascript:")
            || !href.contains(&self.detail_path_marker)
        {
            return None;
        }
        let detail_url = self.base_url.join(href).ok()?;

        Some(Listing::new(
            text_of(cells[ID_COLUMN]),
            text_of(link),
            text_of(cells[AGENCY_COLUMN]),
            text_of(cells[CATEGORY_COLUMN]),
            text_of(cells[STATUS_COLUMN]),
            detail_url.as_str(),
        ))
    }

    fn pager_in(&self, document: &Html) -> PagerState {
        let mut pager = PagerState::default();
        let Some(row) = document.select(&self.pager_row).next() else {
            return pager;
        };

        if let Some(current) = row
            .select(&self.span)
            .find_map(|span| text_of(span).parse::<u32>().ok())
        {
            pager.current = current;
        }

        for link in row.select(&self.anchor) {
            let page = link
                .value()
                .attr("href")
                .and_then(page_argument)
                .or_else(|| text_of(link).parse::<u32>().ok());
            if let Some(page) = page.filter(|p| *p > 0) {
                pager.linked.insert(page);
            }
        }

        pager
    }
}

/// Read `N` out of a `__doPostBack('grid','Page$N')` href.
///
/// `Page$Next`, `Page$Last` and hrefs without a page argument yield `None`.
pub fn page_argument(href: &str) -> Option<u32> {
    let (_, rest) = href.split_once("Page$")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Element text with each text node trimmed and concatenated.
fn text_of(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect()
}

fn compile(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ConfigError(format!("Invalid selector '{css}': {e}")))
}
