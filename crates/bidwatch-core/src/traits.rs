use std::future::Future;

use crate::error::AppError;
use crate::form_state::FormState;
use crate::models::Listing;

/// Fetches raw HTML from the portal.
pub trait Fetcher: Send + Sync + Clone {
    /// GET `url`. Non-success statuses are errors.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;

    /// POST `form` urlencoded to `url` (a postback). Non-success statuses are errors.
    fn post_form(
        &self,
        url: &str,
        form: &FormState,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Persists the full set of known listings between runs.
pub trait SnapshotStore: Send + Sync + Clone {
    /// Load the last snapshot. An absent snapshot is an empty one, not an error.
    fn load(&self) -> impl Future<Output = Result<Vec<Listing>, AppError>> + Send;

    /// Replace the persisted snapshot with `listings`.
    fn save(&self, listings: &[Listing]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Decides whether a listing is worth notifying about.
///
/// `Ok(false)` is a definitive "not relevant"; `Err` means no answer was
/// obtained and the caller decides what to do with the listing.
pub trait RelevanceOracle: Send + Sync + Clone {
    fn classify(&self, listing: &Listing) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Delivers a batch of listings to people.
///
/// Implementations own chunking and their connection lifecycle; a failure
/// anywhere in the batch is reported as a single error.
pub trait Notifier: Send + Sync + Clone {
    fn deliver(&self, listings: &[Listing]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Placeholder oracle for services built without one. Accepts everything.
#[derive(Debug, Clone)]
pub struct NullOracle;

impl RelevanceOracle for NullOracle {
    async fn classify(&self, _listing: &Listing) -> Result<bool, AppError> {
        Ok(true)
    }
}
