pub mod config;
pub mod crawler;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod form_state;
pub mod models;
pub mod scheduler;
pub mod sync;
pub mod throttle;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{
    ChangePolicy, DeliveryFailurePolicy, PortalConfig, SchedulerConfig, SyncConfig,
};
pub use crawler::PaginationCrawler;
pub use enrich::DetailEnricher;
pub use error::AppError;
pub use form_state::FormState;
pub use models::{Listing, SyncReport};
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerReporter, TracingSchedulerReporter};
pub use sync::SyncService;
pub use throttle::{ThrottleConfig, ThrottledFetcher};
pub use traits::{Fetcher, Notifier, NullOracle, RelevanceOracle, SnapshotStore};
