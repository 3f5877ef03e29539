//! Per-host request spacing.
//!
//! [`ThrottledFetcher`] wraps any [`Fetcher`] so that requests to one host
//! start at least [`ThrottleConfig::spacing`] apart. A crawl followed by a
//! burst of detail-page fetches hits the same portal many times in a row;
//! GETs and postbacks draw from the same per-host schedule.
//!
//! Each request reserves the next free start time for its host and then
//! sleeps until it, so concurrent callers queue in reservation order
//! instead of waking together.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use bidwatch_core::throttle::{ThrottleConfig, ThrottledFetcher};
//! # use bidwatch_core::error::AppError;
//! # use bidwatch_core::form_state::FormState;
//! # use bidwatch_core::traits::Fetcher;
//! # #[derive(Clone)] struct Portal;
//! # impl Fetcher for Portal {
//! #     async fn fetch(&self, _: &str) -> Result<String, AppError> { todo!() }
//! #     async fn post_form(&self, _: &str, _: &FormState) -> Result<String, AppError> { todo!() }
//! # }
//!
//! let polite = ThrottledFetcher::new(
//!     Portal,
//!     ThrottleConfig::new(Duration::from_millis(750)).with_jitter(Duration::from_millis(250)),
//! );
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::error::AppError;
use crate::form_state::FormState;
use crate::traits::Fetcher;

/// Spacing between request starts on one host. The default is no spacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub spacing: Duration,
    /// Upper bound of a random extra added to every gap.
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.spacing.is_zero() && self.jitter.is_zero()
    }

    /// One gap: `spacing` plus a draw from `[0, jitter)`.
    fn gap(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.spacing;
        }
        let extra = (Uuid::new_v4().as_u128() % u128::from(jitter_ms)) as u64;
        self.spacing + Duration::from_millis(extra)
    }
}

/// A [`Fetcher`] that spaces out requests per `scheme://host:port`.
///
/// The schedule is shared by every clone.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Requests whose URLs share this key share a schedule. URLs that do
    /// not parse are not throttled.
    fn origin(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let port = parsed.port_or_known_default()?;
        Some(format!("{}://{host}:{port}", parsed.scheme()))
    }

    /// Claim the next start time for `origin` and move the schedule past it.
    fn reserve(&self, origin: String) -> Instant {
        let now = Instant::now();
        let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get(&origin).map_or(now, |&free| free.max(now));
        slots.insert(origin, slot + self.config.gap());
        slot
    }

    async fn wait_turn(&self, url: &str) {
        if self.config.is_disabled() {
            return;
        }
        let Some(origin) = Self::origin(url) else {
            return;
        };
        let slot = self.reserve(origin);
        let now = Instant::now();
        if slot > now {
            tracing::debug!(url, wait_ms = (slot - now).as_millis() as u64, "Waiting for request slot");
            tokio::time::sleep_until(slot).await;
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.wait_turn(url).await;
        self.inner.fetch(url).await
    }

    async fn post_form(&self, url: &str, form: &FormState) -> Result<String, AppError> {
        self.wait_turn(url).await;
        self.inner.post_form(url, form).await
    }
}
