//! Test utilities: mock implementations of all core traits plus HTML
//! builders for the portal's results and detail pages.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so clones handed
//! to a service share their recorded calls with the test.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PortalConfig;
use crate::error::AppError;
use crate::form_state::{EVENT_ARGUMENT, EVENT_TARGET, FormState};
use crate::models::Listing;
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{Fetcher, Notifier, RelevanceOracle, SnapshotStore};

pub const TEST_BASE_URL: &str = "https://portal.test";
pub const TEST_PORTAL_URL: &str = "https://portal.test/Procurement.aspx";

/// Narrative text comfortably above the enrichment length threshold.
pub const DESC_LONG: &str =
    "The agency is soliciting proposals for a multi-year data platform modernization effort.";

const GRID_EVENT_TARGET: &str = "ctl00$MainBody$gdvSearchData";

pub fn test_portal() -> PortalConfig {
    PortalConfig::default().with_base_url(TEST_PORTAL_URL)
}

pub fn detail_url(id: &str) -> String {
    format!("{TEST_BASE_URL}/Procurement_Details.aspx?id={id}")
}

/// Listing as the extractor would produce it for a [`ResultsPage`] row.
pub fn make_listing(id: &str, status: &str) -> Listing {
    Listing::new(
        id,
        format!("Listing {id}"),
        format!("Agency {id}"),
        "IT",
        status,
        detail_url(id),
    )
}

pub fn ids(listings: &[Listing]) -> Vec<&str> {
    listings.iter().map(|l| l.id.as_str()).collect()
}

/// `AppError` is not `Clone` (it wraps `serde_json::Error`); rebuild an
/// equivalent value so a configured failure can be returned repeatedly.
fn replay(error: &AppError) -> AppError {
    match error {
        AppError::HttpError(m) => AppError::HttpError(m.clone()),
        AppError::Timeout(s) => AppError::Timeout(*s),
        AppError::NetworkError(m) => AppError::NetworkError(m.clone()),
        AppError::RateLimitExceeded => AppError::RateLimitExceeded,
        AppError::LlmError {
            message,
            status_code,
            retryable,
        } => AppError::LlmError {
            message: message.clone(),
            status_code: *status_code,
            retryable: *retryable,
        },
        AppError::NotifierError(m) => AppError::NotifierError(m.clone()),
        AppError::StoreError(m) => AppError::StoreError(m.clone()),
        AppError::DatabaseError(m) => AppError::DatabaseError(m.clone()),
        AppError::ConfigError(m) => AppError::ConfigError(m.clone()),
        AppError::Cancelled => AppError::Cancelled,
        AppError::SerializationError(e) => AppError::StoreError(e.to_string()),
    }
}

fn replay_response(response: &Result<String, AppError>) -> Result<String, AppError> {
    match response {
        Ok(html) => Ok(html.clone()),
        Err(e) => Err(replay(e)),
    }
}

// ---------------------------------------------------------------------------
// HTML builders
// ---------------------------------------------------------------------------

struct Row {
    id: String,
    title: String,
    category: String,
    status: String,
}

/// Builds a results page the way the portal renders it: hidden form state,
/// the listings grid and, when other pages are linked, a pager row.
pub struct ResultsPage {
    page: u32,
    rows: Vec<Row>,
    pages: Vec<u32>,
}

impl ResultsPage {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            rows: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn listing(self, id: &str, title: &str) -> Self {
        self.listing_with(id, title, "IT", "Open")
    }

    pub fn listing_with_status(self, id: &str, title: &str, status: &str) -> Self {
        self.listing_with(id, title, "IT", status)
    }

    pub fn listing_in_category(self, id: &str, title: &str, category: &str) -> Self {
        self.listing_with(id, title, category, "Open")
    }

    fn listing_with(mut self, id: &str, title: &str, category: &str, status: &str) -> Self {
        self.rows.push(Row {
            id: id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            status: status.to_string(),
        });
        self
    }

    /// Page numbers rendered as pager links. The current page is rendered
    /// as a plain span regardless.
    pub fn pages(mut self, pages: impl IntoIterator<Item = u32>) -> Self {
        self.pages.extend(pages);
        self
    }

    pub fn render(&self) -> String {
        let page = self.page;
        let mut html = String::new();
        let _ = write!(
            html,
            r#"<html><body><form method="post" action="./Procurement.aspx" id="aspnetForm">
<input type="hidden" name="__EVENTTARGET" id="__EVENTTARGET" value="" />
<input type="hidden" name="__EVENTARGUMENT" id="__EVENTARGUMENT" value="" />
<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="state-page-{page}" />
<input type="hidden" name="__VIEWSTATEGENERATOR" id="__VIEWSTATEGENERATOR" value="8D0E13E6" />
<input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="validation-page-{page}" />
<div id="MainBody">
<table id="ctl00_MainBody_gdvSearchData">
<tr><th>Solicitation #</th><th>Title</th><th>Agency</th><th>Type</th><th>Due Date</th><th>Status</th></tr>
"#
        );
        for row in &self.rows {
            let _ = writeln!(
                html,
                r#"<tr><td>{id}</td><td><a href="Procurement_Details.aspx?id={id}">{title}</a></td><td>Agency {id}</td><td>{category}</td><td>12/31/2026</td><td>{status}</td></tr>"#,
                id = row.id,
                title = row.title,
                category = row.category,
                status = row.status,
            );
        }

        if !self.pages.is_empty() {
            let mut numbers: Vec<u32> = self.pages.clone();
            numbers.push(page);
            numbers.sort_unstable();
            numbers.dedup();

            html.push_str(r#"<tr class="GridPager"><td colspan="6"><table><tr>"#);
            for n in numbers {
                if n == page {
                    let _ = write!(html, "<td><span>{n}</span></td>");
                } else {
                    let _ = write!(
                        html,
                        r#"<td><a href="javascript:__doPostBack('{GRID_EVENT_TARGET}','Page${n}')">{n}</a></td>"#
                    );
                }
            }
            html.push_str("</tr></table></td></tr>\n");
        }

        html.push_str("</table>\n</div></form></body></html>");
        html
    }
}

/// Builds a detail page whose paragraphs sit directly inside `#MainBody`.
#[derive(Default)]
pub struct DetailPage {
    paragraphs: Vec<String>,
}

impl DetailPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.paragraphs.push(text.to_string());
        self
    }

    pub fn render(&self) -> String {
        let body: String = self
            .paragraphs
            .iter()
            .map(|p| format!("<p>{p}</p>"))
            .collect();
        format!(
            r#"<html><head><title>Solicitation Details</title></head><body><div id="MainBody">{body}</div></body></html>"#
        )
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// One recorded postback.
#[derive(Debug, Clone)]
pub struct PostbackRecord {
    pub url: String,
    /// Page requested through `Page$N`, if the argument had that shape.
    pub page: Option<u32>,
    pub event_target: Option<String>,
    pub view_state: Option<String>,
}

/// Routes GETs by URL and postbacks by requested page number.
///
/// Anything unrouted answers with an HTTP 404 error.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Result<String, AppError>>>>,
    postbacks: Arc<Mutex<HashMap<u32, Result<String, AppError>>>>,
    gets: Arc<Mutex<Vec<String>>>,
    posts: Arc<Mutex<Vec<PostbackRecord>>>,
    latency: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(html.into()));
        self
    }

    pub fn with_page_error(self, url: &str, error: AppError) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), Err(error));
        self
    }

    pub fn with_detail_page(self, id: &str, html: impl Into<String>) -> Self {
        self.with_page(&detail_url(id), html)
    }

    pub fn with_postback(self, page: u32, html: impl Into<String>) -> Self {
        self.postbacks.lock().unwrap().insert(page, Ok(html.into()));
        self
    }

    pub fn with_postback_error(self, page: u32, error: AppError) -> Self {
        self.postbacks.lock().unwrap().insert(page, Err(error));
        self
    }

    /// Every request sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    /// GETs that hit a detail page, in call order.
    pub fn detail_fetches(&self) -> Vec<String> {
        self.gets()
            .into_iter()
            .filter(|url| url.contains("Procurement_Details.aspx"))
            .collect()
    }

    pub fn postbacks(&self) -> Vec<PostbackRecord> {
        self.posts.lock().unwrap().clone()
    }

    pub fn posted_pages(&self) -> Vec<u32> {
        self.postbacks().iter().filter_map(|p| p.page).collect()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.delay().await;
        self.gets.lock().unwrap().push(url.to_string());
        match self.pages.lock().unwrap().get(url) {
            Some(response) => replay_response(response),
            None => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }

    async fn post_form(&self, url: &str, form: &FormState) -> Result<String, AppError> {
        self.delay().await;
        let page = form
            .get(EVENT_ARGUMENT)
            .and_then(|arg| arg.strip_prefix("Page$"))
            .and_then(|n| n.parse::<u32>().ok());
        self.posts.lock().unwrap().push(PostbackRecord {
            url: url.to_string(),
            page,
            event_target: form.get(EVENT_TARGET).map(str::to_string),
            view_state: form.get("__VIEWSTATE").map(str::to_string),
        });

        let routes = self.postbacks.lock().unwrap();
        match page.and_then(|p| routes.get(&p)) {
            Some(response) => replay_response(response),
            None => Err(AppError::HttpError(format!("HTTP 404 for postback {page:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockOracle
// ---------------------------------------------------------------------------

/// Oracle that accepts everything except ids configured otherwise.
#[derive(Clone, Default)]
pub struct MockOracle {
    rejected: Arc<Mutex<HashSet<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    classified: Arc<Mutex<Vec<String>>>,
}

impl MockOracle {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn rejecting(self, id: &str) -> Self {
        self.rejected.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn failing(self, id: &str) -> Self {
        self.failing.lock().unwrap().insert(id.to_string());
        self
    }

    /// Ids classified so far, in call order.
    pub fn classified(&self) -> Vec<String> {
        self.classified.lock().unwrap().clone()
    }
}

impl RelevanceOracle for MockOracle {
    async fn classify(&self, listing: &Listing) -> Result<bool, AppError> {
        self.classified.lock().unwrap().push(listing.id.clone());
        if self.failing.lock().unwrap().contains(&listing.id) {
            return Err(AppError::LlmError {
                message: "model unavailable".into(),
                status_code: 503,
                retryable: true,
            });
        }
        Ok(!self.rejected.lock().unwrap().contains(&listing.id))
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// Notifier that records every batch it is handed.
#[derive(Clone, Default)]
pub struct MockNotifier {
    batches: Arc<Mutex<Vec<Vec<Listing>>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose every delivery fails with `error`.
    pub fn with_error(error: AppError) -> Self {
        Self {
            batches: Arc::default(),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn batches(&self) -> Vec<Vec<Listing>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn deliver(&self, listings: &[Listing]) -> Result<(), AppError> {
        self.batches.lock().unwrap().push(listings.to_vec());
        match self.error.lock().unwrap().as_ref() {
            Some(e) => Err(replay(e)),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory snapshot store that records every save.
#[derive(Clone, Default)]
pub struct MockStore {
    snapshot: Arc<Mutex<Vec<Listing>>>,
    saves: Arc<Mutex<Vec<Vec<Listing>>>>,
    load_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    /// No previous snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_snapshot(listings: Vec<Listing>) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(listings)),
            ..Self::default()
        }
    }

    /// Store whose every load fails with `error`.
    pub fn with_load_error(error: AppError) -> Self {
        Self {
            load_error: Arc::new(Mutex::new(Some(error))),
            ..Self::default()
        }
    }

    /// What a load would return right now.
    pub fn current(&self) -> Vec<Listing> {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn saves(&self) -> Vec<Vec<Listing>> {
        self.saves.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

impl SnapshotStore for MockStore {
    async fn load(&self) -> Result<Vec<Listing>, AppError> {
        if let Some(e) = self.load_error.lock().unwrap().as_ref() {
            return Err(replay(e));
        }
        Ok(self.current())
    }

    async fn save(&self, listings: &[Listing]) -> Result<(), AppError> {
        *self.snapshot.lock().unwrap() = listings.to_vec();
        self.saves.lock().unwrap().push(listings.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Scheduler reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let label = match &event {
            SchedulerEvent::Started { .. } => "Started",
            SchedulerEvent::StateReset => "StateReset",
            SchedulerEvent::RunStarted { .. } => "RunStarted",
            SchedulerEvent::RunCompleted { .. } => "RunCompleted",
            SchedulerEvent::RunFailed { .. } => "RunFailed",
            SchedulerEvent::RunCancelled { .. } => "RunCancelled",
            SchedulerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
