use std::collections::{HashMap, HashSet};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::config::{ChangePolicy, DeliveryFailurePolicy, PortalConfig, SyncConfig};
use crate::crawler::PaginationCrawler;
use crate::enrich::DetailEnricher;
use crate::error::AppError;
use crate::models::{Listing, SyncReport};
use crate::traits::{Fetcher, Notifier, RelevanceOracle, SnapshotStore};

/// Orchestrates one watch cycle: crawl → diff → enrich → classify → notify → snapshot.
///
/// Generic over all external collaborators via traits, so the whole cycle
/// runs against mocks in tests.
pub struct SyncService<F, O, N, S>
where
    F: Fetcher,
    O: RelevanceOracle,
    N: Notifier,
    S: SnapshotStore,
{
    crawler: PaginationCrawler<F>,
    enricher: DetailEnricher<F>,
    oracle: Option<O>,
    notifier: N,
    store: S,
    config: SyncConfig,
}

impl<F, O, N, S> SyncService<F, O, N, S>
where
    F: Fetcher,
    O: RelevanceOracle,
    N: Notifier,
    S: SnapshotStore,
{
    /// Create a service that forwards every new listing.
    pub fn new(
        fetcher: F,
        portal: PortalConfig,
        notifier: N,
        store: S,
        config: SyncConfig,
    ) -> Result<Self, AppError> {
        Ok(Self {
            crawler: PaginationCrawler::new(fetcher.clone(), portal)?,
            enricher: DetailEnricher::new(fetcher),
            oracle: None,
            notifier,
            store,
            config,
        })
    }

    /// Create a service that forwards only listings the oracle accepts.
    pub fn with_oracle(
        fetcher: F,
        portal: PortalConfig,
        oracle: O,
        notifier: N,
        store: S,
        config: SyncConfig,
    ) -> Result<Self, AppError> {
        let mut service = Self::new(fetcher, portal, notifier, store, config)?;
        service.oracle = Some(oracle);
        Ok(service)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one full cycle.
    ///
    /// 1. Crawl the portal
    /// 2. Load the previous snapshot and split the crawl into new / known
    /// 3. Enrich new listings only
    /// 4. Ask the oracle (if any) about each of them
    /// 5. Deliver the accepted ones as one batch
    /// 6. Merge crawl and snapshot
    /// 7. Persist the merged snapshot
    ///
    /// A crawl or store failure aborts before the snapshot is touched. A
    /// notifier failure is returned after applying the configured
    /// [`DeliveryFailurePolicy`].
    pub async fn sync_once(&self) -> Result<SyncReport, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        // 1. Crawl
        tracing::info!(%run_id, "Fetching current listings");
        let current = self.crawler.crawl().await?;

        // 2. Diff
        let previous = self.store.load().await?;
        tracing::info!(
            %run_id,
            crawled = current.len(),
            previous = previous.len(),
            "Loaded previous snapshot"
        );
        let fresh = select_new(&current, &previous, self.config.change_policy);
        tracing::info!(%run_id, new = fresh.len(), "Detected new listings");

        // 3. Enrich
        let enriched = self.enrich_all(fresh).await;
        let enriched_count = enriched.iter().filter(|l| l.description.is_some()).count();

        // 4. Classify
        let (to_send, oracle_failures) = self.select_relevant(&enriched).await;

        // 6. Merge (computed before delivery so the failure policy can use it)
        let snapshot = merge_snapshot(&previous, &current, &enriched);

        // 5. Deliver
        let delivered = !to_send.is_empty();
        if delivered {
            tracing::info!(%run_id, count = to_send.len(), "Sending listings to notifier");
            if let Err(e) = self.notifier.deliver(&to_send).await {
                match self.config.delivery_failure_policy {
                    DeliveryFailurePolicy::SaveSnapshot => {
                        tracing::error!(%run_id, error = %e, "Delivery failed, saving snapshot anyway");
                        self.store.save(&snapshot).await?;
                    }
                    DeliveryFailurePolicy::SkipSnapshot => {
                        tracing::error!(%run_id, error = %e, "Delivery failed, snapshot left unchanged");
                    }
                }
                return Err(e);
            }
        } else {
            tracing::info!(%run_id, "No listings to send");
        }

        // 7. Persist
        self.store.save(&snapshot).await?;

        let report = SyncReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            crawled: current.len(),
            new: enriched.len(),
            enriched: enriched_count,
            forwarded: to_send.len(),
            oracle_failures,
            snapshot_size: snapshot.len(),
            delivered,
        };
        tracing::info!(
            %run_id,
            crawled = report.crawled,
            new = report.new,
            forwarded = report.forwarded,
            snapshot_size = report.snapshot_size,
            "Sync complete"
        );
        Ok(report)
    }

    /// Enrich concurrently, keeping discovery order.
    async fn enrich_all(&self, listings: Vec<Listing>) -> Vec<Listing> {
        if listings.is_empty() {
            return listings;
        }
        let enricher = &self.enricher;
        stream::iter(listings)
            .map(|listing| async move { enricher.enrich(&listing).await })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Listings to forward plus the number of oracle failures.
    ///
    /// Without an oracle everything is forwarded. An oracle error excludes
    /// that listing only.
    async fn select_relevant(&self, listings: &[Listing]) -> (Vec<Listing>, usize) {
        let Some(oracle) = &self.oracle else {
            return (listings.to_vec(), 0);
        };
        if listings.is_empty() {
            return (Vec::new(), 0);
        }

        tracing::info!(count = listings.len(), "Classifying new listings for relevance");
        let verdicts: Vec<(&Listing, Result<bool, AppError>)> = stream::iter(listings)
            .map(|listing| async move { (listing, oracle.classify(listing).await) })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut accepted = Vec::new();
        let mut failures = 0;
        for (listing, verdict) in verdicts {
            match verdict {
                Ok(true) => accepted.push(listing.clone()),
                Ok(false) => {
                    tracing::debug!(listing_id = %listing.id, "Listing deemed not relevant");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(listing_id = %listing.id, error = %e, "Oracle error, listing not forwarded");
                }
            }
        }
        tracing::info!(
            relevant = accepted.len(),
            total = listings.len(),
            failures,
            "Relevance filtering complete"
        );
        (accepted, failures)
    }
}

/// Listings of `current` that must be treated as new, in crawl order.
///
/// Under [`ChangePolicy::Identity`] a listing is new when neither its `id`
/// nor its `detail_url` appear in `previous`. [`ChangePolicy::Content`]
/// additionally re-selects known listings whose title or status moved.
pub fn select_new(
    current: &[Listing],
    previous: &[Listing],
    policy: ChangePolicy,
) -> Vec<Listing> {
    let by_id: HashMap<&str, &Listing> = previous.iter().map(|l| (l.id.as_str(), l)).collect();
    let by_url: HashMap<&str, &Listing> = previous
        .iter()
        .map(|l| (l.detail_url.as_str(), l))
        .collect();

    current
        .iter()
        .filter(|listing| {
            let known = by_id
                .get(listing.id.as_str())
                .or_else(|| by_url.get(listing.detail_url.as_str()));
            match (known, policy) {
                (None, _) => true,
                (Some(_), ChangePolicy::Identity) => false,
                (Some(prev), ChangePolicy::Content) => listing.differs_in_content(prev),
            }
        })
        .cloned()
        .collect()
}

/// Build the next snapshot.
///
/// Every previous record is carried forward. Ids present in `current` are
/// overridden: by their enriched copy when the listing went through
/// enrichment this run, otherwise by the crawled fields on top of the
/// previously stored description. An enriched copy without a description
/// also keeps the stored one. Unknown ids are appended in crawl order.
pub fn merge_snapshot(
    previous: &[Listing],
    current: &[Listing],
    enriched: &[Listing],
) -> Vec<Listing> {
    let enriched_by_id: HashMap<&str, &Listing> =
        enriched.iter().map(|l| (l.id.as_str(), l)).collect();
    let prev_by_id: HashMap<&str, &Listing> =
        previous.iter().map(|l| (l.id.as_str(), l)).collect();
    let prev_by_url: HashMap<&str, &Listing> = previous
        .iter()
        .map(|l| (l.detail_url.as_str(), l))
        .collect();

    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut snapshot: Vec<Listing> = Vec::with_capacity(previous.len() + current.len());
    for listing in previous {
        if positions.contains_key(&listing.id) {
            continue;
        }
        positions.insert(listing.id.clone(), snapshot.len());
        snapshot.push(listing.clone());
    }

    let mut placed: HashSet<&str> = HashSet::new();
    for listing in current {
        if !placed.insert(listing.id.as_str()) {
            continue;
        }
        let prev = prev_by_id
            .get(listing.id.as_str())
            .or_else(|| prev_by_url.get(listing.detail_url.as_str()));
        let updated = match (enriched_by_id.get(listing.id.as_str()), prev) {
            // a failed re-enrichment must not erase the stored description
            (Some(fresh), Some(prev)) if fresh.description.is_none() => fresh.refreshed_from(prev),
            (Some(fresh), _) => (*fresh).clone(),
            (None, Some(prev)) => listing.refreshed_from(prev),
            (None, None) => listing.clone(),
        };
        match positions.get(&updated.id) {
            Some(&index) => snapshot[index] = updated,
            None => {
                positions.insert(updated.id.clone(), snapshot.len());
                snapshot.push(updated);
            }
        }
    }

    snapshot
}
