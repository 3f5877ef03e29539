use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.emarketplace.state.pa.us/Procurement.aspx";

/// Where the portal lives and how its results grid is rendered.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Search page; every GET and postback goes here.
    pub base_url: String,
    /// Control name posted as `__EVENTTARGET` to page the grid.
    pub grid_event_target: String,
    /// `id` attribute of the results `<table>`.
    pub grid_table_id: String,
    /// `class` of the pager row inside the grid.
    pub pager_row_class: String,
    /// Substring every detail link must contain.
    pub detail_path_marker: String,
    /// Rows with fewer `<td>` cells are not listings.
    pub min_columns: usize,
    /// Upper bound on pages fetched in one crawl.
    pub max_pages: usize,
    /// Keep only listings whose category matches (case-insensitive).
    pub category_filter: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            grid_event_target: "ctl00$MainBody$gdvSearchData".to_string(),
            grid_table_id: "ctl00_MainBody_gdvSearchData".to_string(),
            pager_row_class: "GridPager".to_string(),
            detail_path_marker: "Procurement_Details.aspx?id=".to_string(),
            min_columns: 6,
            max_pages: 500,
            category_filter: None,
        }
    }
}

impl PortalConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = max;
        self
    }

    pub fn with_category_filter(mut self, category: impl Into<String>) -> Self {
        self.category_filter = Some(category.into());
        self
    }
}

/// How already-known listings are treated on a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangePolicy {
    /// Only listings unseen by `id` and `detail_url` count as new.
    #[default]
    Identity,
    /// Also treat known listings whose title or status changed as new.
    Content,
}

/// What happens to the snapshot when the notifier fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryFailurePolicy {
    /// Leave the previous snapshot in place so the next run re-delivers.
    #[default]
    SkipSnapshot,
    /// Persist anyway; undelivered listings will not be sent again.
    SaveSnapshot,
}

impl DeliveryFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryFailurePolicy::SkipSnapshot => "skip",
            DeliveryFailurePolicy::SaveSnapshot => "save",
        }
    }
}

impl fmt::Display for DeliveryFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(DeliveryFailurePolicy::SkipSnapshot),
            "save" => Ok(DeliveryFailurePolicy::SaveSnapshot),
            _ => Err(format!("Unknown delivery failure policy: {}", s)),
        }
    }
}

/// Tuning for a single sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent enrichment or oracle calls.
    pub concurrency: usize,
    pub change_policy: ChangePolicy,
    pub delivery_failure_policy: DeliveryFailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            change_policy: ChangePolicy::default(),
            delivery_failure_policy: DeliveryFailurePolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_change_policy(mut self, policy: ChangePolicy) -> Self {
        self.change_policy = policy;
        self
    }

    pub fn with_delivery_failure_policy(mut self, policy: DeliveryFailurePolicy) -> Self {
        self.delivery_failure_policy = policy;
        self
    }
}

/// Configuration for the periodic trigger.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Discard the persisted snapshot before the first run.
    pub reset_state_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            reset_state_on_start: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval_minutes(mut self, minutes: u64) -> Self {
        self.interval = Duration::from_secs(minutes * 60);
        self
    }

    pub fn with_reset_state_on_start(mut self, reset: bool) -> Self {
        self.reset_state_on_start = reset;
        self
    }
}

/// Parse a boolean flag the way `.env` files usually spell them.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
