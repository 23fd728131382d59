use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::fetcher::{FeedSource, Fetcher};
use super::service::FeedService;
use crate::shutdown::Shutdown;
use crate::storage::Feed;

/// Outcome of a single scheduler tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Feeds returned by due selection
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Articles that were new across all units
    pub inserted: usize,
}

impl TickSummary {
    /// Units that actually ran; lower than `selected` when shutdown cut dispatch short
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Periodic scheduler: every `interval`, ingest up to `concurrency` due feeds.
pub struct Worker<S = Fetcher> {
    service: Arc<FeedService<S>>,
    interval: Duration,
    concurrency: usize,
}

impl<S: FeedSource + 'static> Worker<S> {
    pub fn new(service: Arc<FeedService<S>>, interval: Duration, concurrency: usize) -> Self {
        Self {
            service,
            // tokio intervals panic on a zero period
            interval: interval.max(Duration::from_millis(1)),
            concurrency: concurrency.max(1),
        }
    }

    /// Tick until `shutdown` fires.
    ///
    /// The first tick happens one interval after start. A tick runs to
    /// completion before the next one is observed; ticks missed meanwhile are
    /// skipped rather than queued.
    pub async fn start(&self, shutdown: Shutdown) {
        tracing::info!(
            concurrency = self.concurrency,
            interval_secs = self.interval.as_secs_f64(),
            "Feed worker started"
        );

        let signal = &shutdown;
        tick_until_shutdown(self.interval, signal, move || self.run_once(signal)).await;
        tracing::info!("Feed worker shutting down");
    }

    /// Run one tick: select due feeds and ingest them with bounded concurrency.
    ///
    /// Returns after every dispatched unit has finished. Unit failures are
    /// logged and counted, never propagated.
    pub async fn run_once(&self, shutdown: &Shutdown) -> TickSummary {
        let feeds = match self
            .service
            .get_next_feeds_to_fetch(self.concurrency, self.interval)
            .await
        {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select due feeds");
                return TickSummary::default();
            }
        };

        let summary = self.dispatch(feeds, shutdown).await;
        if summary.selected > 0 {
            tracing::info!(
                selected = summary.selected,
                succeeded = summary.succeeded,
                failed = summary.failed,
                inserted = summary.inserted,
                "Tick complete"
            );
        }
        summary
    }

    async fn dispatch(&self, feeds: Vec<Feed>, shutdown: &Shutdown) -> TickSummary {
        let mut summary = TickSummary {
            selected: feeds.len(),
            ..TickSummary::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut units = JoinSet::new();

        for feed in feeds {
            if shutdown.is_triggered() {
                tracing::debug!("Shutdown observed, not dispatching remaining feeds");
                break;
            }

            // Acquired before spawning so at most `concurrency` units exist at once
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let service = Arc::clone(&self.service);
            let shutdown = shutdown.clone();

            units.spawn(async move {
                let _permit = permit;
                let result = service.fetch_and_store_feed(&feed, &shutdown).await;
                match &result {
                    Ok(inserted) => tracing::debug!(
                        feed_id = feed.id,
                        url = %feed.feed_url,
                        inserted,
                        "Feed ingested"
                    ),
                    Err(e) => tracing::warn!(
                        feed_id = feed.id,
                        url = %feed.feed_url,
                        error = %e,
                        "Feed ingestion failed"
                    ),
                }
                result
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(inserted)) => {
                    summary.succeeded += 1;
                    summary.inserted += inserted;
                }
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Feed ingestion unit panicked");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

/// Await `on_tick` every `interval` until `shutdown` fires.
///
/// No tick at time zero. An overrunning `on_tick` collapses every missed tick
/// into one immediate tick, then the schedule realigns to the interval grid.
async fn tick_until_shutdown<F, Fut>(interval: Duration, shutdown: &Shutdown, mut on_tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                on_tick().await;
            }
        }
    }
}
