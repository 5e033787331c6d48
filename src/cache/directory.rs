//! Refresh coordination for the member directory.
//!
//! This module owns the full lifecycle of the email -> membership lookup
//! table:
//! - Staleness detection against a fixed 24h threshold
//! - Single-flight refresh: one caller loads, concurrent callers wait
//! - Stuck-refresh takeover: an in-flight refresh older than 30 minutes is
//!   presumed hung and superseded by a fresh attempt
//! - Generation-checked commit: a load that was superseded while running is
//!   discarded instead of overwriting newer data
//!
//! Waiters subscribe to a `watch` channel rather than polling. `watch` is
//! used specifically because it is level-triggered: a late subscriber still
//! observes the current marker value and cannot miss the completion signal,
//! which `Notify` does not guarantee.

use crate::cache::snapshot::{MemberSnapshot, SnapshotHolder};
use crate::error::TurnstileError;
use crate::metrics::SharedMetrics;
use crate::model::Customer;
use std::future::Future;
use tokio::sync::{watch, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Records fetched per upstream page.
const PAGE_SIZE: u32 = 100;
/// A snapshot at least this old must be rebuilt before serving.
const STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);
/// An in-flight refresh older than this is presumed hung and taken over.
const STUCK_AFTER: Duration = Duration::from_secs(30 * 60);

/// A paginated feed of customer records.
///
/// `fetch_page` returns up to `count` records starting at `offset`; an empty
/// page signals exhaustion. Implemented by the billing API client in
/// production and by scripted stubs in tests.
pub trait CustomerSource {
    fn fetch_page(
        &self,
        count: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<Customer>, TurnstileError>> + Send;
}

/// Refresh bookkeeping, guarded by a single mutex so the stale check,
/// in-flight check, and claim write cannot interleave.
#[derive(Debug)]
struct RefreshState {
    /// When the last non-superseded refresh completed. None = never.
    last_refresh_completed_at: Option<Instant>,
    /// When the current refresh attempt started. None = idle.
    refresh_started_at: Option<Instant>,
    /// Bumped for every refresh attempt. A load may only commit if the
    /// generation it was started under is still current.
    generation: u64,
}

impl RefreshState {
    fn new() -> Self {
        Self {
            last_refresh_completed_at: None,
            refresh_started_at: None,
            generation: 0,
        }
    }

    /// Stale when no refresh ever completed, or the last completed one has
    /// reached the threshold (the exact boundary counts as stale).
    fn is_stale(&self) -> bool {
        match self.last_refresh_completed_at {
            Some(completed) => completed.elapsed() >= STALE_AFTER,
            None => true,
        }
    }
}

/// What `ensure_fresh` decided under the state lock.
enum Claim {
    /// Snapshot is fresh, nothing to do.
    Fresh,
    /// Another caller's refresh is in flight; await its completion signal.
    Wait(watch::Receiver<bool>),
    /// This caller claimed the refresh slot for the given generation.
    Run(u64),
}

/// In-memory, periodically-refreshed mapping from a customer's email to
/// their latest membership record.
pub struct MemberDirectory<S> {
    source: S,
    snapshot: SnapshotHolder,
    state: Mutex<RefreshState>,
    /// True while a refresh is in flight; waiters subscribe to this.
    inflight_tx: watch::Sender<bool>,
    metrics: SharedMetrics,
}

impl<S: CustomerSource> MemberDirectory<S> {
    pub fn new(source: S, metrics: SharedMetrics) -> Self {
        let (inflight_tx, _) = watch::channel(false);
        Self {
            source,
            snapshot: SnapshotHolder::new(MemberSnapshot::empty()),
            state: Mutex::new(RefreshState::new()),
            inflight_tx,
            metrics,
        }
    }

    /// Handle on the snapshot holder, for read-only surfaces like /health.
    pub fn snapshot(&self) -> SnapshotHolder {
        self.snapshot.clone()
    }

    /// Look up the membership record for an email address.
    ///
    /// Triggers a refresh first if the snapshot is stale. A failed refresh
    /// is never escalated here; the lookup proceeds against whatever
    /// snapshot exists, and `None` is a normal no-record outcome.
    pub async fn lookup(&self, email: &str) -> Option<Customer> {
        self.ensure_fresh().await;

        let snapshot = self.snapshot.get().await;
        let record = snapshot.get(email).cloned();
        self.metrics.record_lookup(record.is_some());
        record
    }

    /// Bring the snapshot up to date if it is stale.
    ///
    /// At most one refresh runs at a time. A caller that finds a refresh
    /// already in flight waits for it unless it started more than 30 minutes
    /// ago, in which case the caller takes over with a new attempt.
    pub(crate) async fn ensure_fresh(&self) {
        let claim = {
            let mut state = self.state.lock().await;
            if !state.is_stale() {
                Claim::Fresh
            } else {
                match state.refresh_started_at {
                    Some(started) if started.elapsed() <= STUCK_AFTER => {
                        Claim::Wait(self.inflight_tx.subscribe())
                    }
                    in_flight => {
                        if let Some(started) = in_flight {
                            warn!(
                                in_flight_secs = started.elapsed().as_secs(),
                                "In-flight refresh looks stuck, starting a new attempt"
                            );
                        } else {
                            info!("Member snapshot is stale, refreshing");
                        }
                        state.refresh_started_at = Some(Instant::now());
                        state.generation += 1;
                        self.inflight_tx.send_replace(true);
                        Claim::Run(state.generation)
                    }
                }
            }
        };

        match claim {
            Claim::Fresh => {}
            Claim::Wait(mut rx) => {
                debug!("Waiting for in-flight refresh to finish");
                // The refresher's result is authoritative for this caller,
                // whether it succeeded or not.
                while *rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }
            Claim::Run(generation) => self.run_refresh(generation).await,
        }
    }

    /// Execute one refresh attempt end to end: bulk load, preemption check,
    /// snapshot swap, state update.
    async fn run_refresh(&self, generation: u64) {
        let started = Instant::now();
        let loaded = self.load_all().await;

        let mut state = self.state.lock().await;
        match loaded {
            Ok(customers) => {
                // A takeover bumped the generation while this load was
                // running; the newer attempt owns the marker and the result
                // of this one must not land.
                if state.generation != generation {
                    warn!(
                        "Ignoring refresh result because a newer attempt was started in the meantime"
                    );
                    self.metrics.record_refresh("preempted", started.elapsed().as_secs_f64());
                    return;
                }

                let records = customers.len();
                let snapshot = MemberSnapshot::build(customers);
                self.metrics.update_snapshot_metrics(&snapshot);
                self.snapshot.swap(snapshot).await;

                state.refresh_started_at = None;
                state.last_refresh_completed_at = Some(Instant::now());
                self.inflight_tx.send_replace(false);

                self.metrics.record_refresh("success", started.elapsed().as_secs_f64());
                info!(
                    records,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Member directory refreshed"
                );
            }
            Err(e) => {
                error!(error = %e, "Refresh failed, keeping previous snapshot");
                self.metrics.record_refresh("error", started.elapsed().as_secs_f64());

                // Only the attempt that still owns the current generation
                // may release the in-flight marker; a superseded attempt
                // must leave the successor's claim alone.
                if state.generation == generation {
                    state.refresh_started_at = None;
                    self.inflight_tx.send_replace(false);
                }
            }
        }
    }

    /// Fetch every page from the source until exhaustion.
    ///
    /// An empty page is the only termination signal; short pages do not end
    /// the load. Any page failure aborts the whole attempt.
    async fn load_all(&self) -> Result<Vec<Customer>, TurnstileError> {
        let mut customers = Vec::new();
        let mut offset = 0u32;

        loop {
            let page = self.source.fetch_page(PAGE_SIZE, offset).await?;
            debug!(records = page.len(), offset, "Fetched customer page");
            if page.is_empty() {
                break;
            }
            customers.extend(page);
            offset += PAGE_SIZE;
        }

        Ok(customers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_metrics;
    use crate::model::{Subscription, SubscriptionStatus};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    fn customer(id: u64, email: &str, status: SubscriptionStatus) -> Customer {
        Customer {
            id,
            email: email.to_string(),
            name: None,
            customer_reference: None,
            subscription: Subscription {
                id: Some(id),
                status,
                plan_id: None,
                current_period_start: None,
                current_period_end: None,
            },
        }
    }

    fn page_of(offset: u64, count: u64) -> Vec<Customer> {
        (0..count)
            .map(|i| {
                customer(
                    offset + i,
                    &format!("user{}@example.com", offset + i),
                    SubscriptionStatus::Active,
                )
            })
            .collect()
    }

    /// One scripted response per fetch call, consumed in order. Calls past
    /// the end of the script return an empty page.
    enum Step {
        Page(Vec<Customer>),
        Delayed(Duration, Vec<Customer>),
        Fail,
    }

    struct ScriptedSource {
        steps: StdMutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: StdMutex::new(steps.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CustomerSource for Arc<ScriptedSource> {
        async fn fetch_page(
            &self,
            _count: u32,
            _offset: u32,
        ) -> Result<Vec<Customer>, TurnstileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Page(page)) => Ok(page),
                Some(Step::Delayed(delay, page)) => {
                    tokio::time::sleep(delay).await;
                    Ok(page)
                }
                Some(Step::Fail) => Err(TurnstileError::Upstream("scripted failure".into())),
                None => Ok(Vec::new()),
            }
        }
    }

    fn make_directory(
        steps: Vec<Step>,
    ) -> (Arc<MemberDirectory<Arc<ScriptedSource>>>, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource::new(steps));
        let directory = Arc::new(MemberDirectory::new(source.clone(), create_metrics()));
        (directory, source)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_runs_until_empty_page() {
        let (directory, source) = make_directory(vec![
            Step::Page(page_of(0, 100)),
            Step::Page(page_of(100, 100)),
            Step::Page(Vec::new()),
        ]);

        let record = directory.lookup("user150@example.com").await;

        assert_eq!(record.unwrap().id, 150);
        assert_eq!(source.calls(), 3);
        assert_eq!(directory.snapshot().get().await.len(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_trigger_one_load() {
        let (directory, source) = make_directory(vec![
            Step::Delayed(
                Duration::from_millis(50),
                vec![customer(1, "a@example.com", SubscriptionStatus::Active)],
            ),
            Step::Page(Vec::new()),
        ]);

        let (first, second) = tokio::join!(
            directory.lookup("a@example.com"),
            directory.lookup("b@example.com")
        );

        // Both lookups observe the single load's snapshot: one underlying
        // load, two pages fetched.
        assert_eq!(first.unwrap().id, 1);
        assert!(second.is_none());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_refresh_is_taken_over_and_its_result_discarded() {
        let (directory, source) = make_directory(vec![
            // First attempt hangs on its first page for 40 minutes.
            Step::Delayed(
                Duration::from_secs(40 * 60),
                vec![customer(1, "member@example.com", SubscriptionStatus::Active)],
            ),
            // Takeover attempt loads immediately.
            Step::Page(vec![customer(
                2,
                "member@example.com",
                SubscriptionStatus::Active,
            )]),
            Step::Page(Vec::new()),
            // First attempt's second page, fetched after it finally wakes.
            Step::Page(Vec::new()),
        ]);

        let stuck = {
            let directory = directory.clone();
            tokio::spawn(async move { directory.lookup("member@example.com").await })
        };
        // Let the first attempt claim the refresh slot and start loading.
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 31 minutes in, the in-flight refresh is past the stuck threshold:
        // this lookup must start a second load rather than wait.
        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        let fresh = directory.lookup("member@example.com").await;
        assert_eq!(fresh.unwrap().id, 2);

        // The stuck attempt eventually completes its load, detects it was
        // superseded, and leaves the newer snapshot untouched.
        let stale = stuck.await.unwrap();
        assert_eq!(stale.unwrap().id, 2);
        assert_eq!(source.calls(), 4);
        assert_eq!(
            directory
                .lookup("member@example.com")
                .await
                .unwrap()
                .id,
            2
        );
        // That last lookup hit a fresh snapshot, so no further fetches.
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_boundary_at_24_hours() {
        let (directory, source) = make_directory(vec![
            Step::Page(vec![customer(1, "a@example.com", SubscriptionStatus::Active)]),
            Step::Page(Vec::new()),
            Step::Page(vec![customer(2, "a@example.com", SubscriptionStatus::Active)]),
            Step::Page(Vec::new()),
        ]);

        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 1);
        assert_eq!(source.calls(), 2);

        // One second shy of the threshold: still fresh, no refetch.
        tokio::time::advance(STALE_AFTER - Duration::from_secs(1)).await;
        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 1);
        assert_eq!(source.calls(), 2);

        // Exactly 24 hours elapsed counts as stale.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 2);
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_old_snapshot_and_retries() {
        let (directory, source) = make_directory(vec![
            Step::Page(vec![customer(1, "a@example.com", SubscriptionStatus::Active)]),
            Step::Page(Vec::new()),
            Step::Fail,
            Step::Page(vec![customer(2, "a@example.com", SubscriptionStatus::Active)]),
            Step::Page(Vec::new()),
        ]);

        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 1);
        tokio::time::advance(STALE_AFTER).await;

        // The refresh attempt fails; the lookup falls back to the stale
        // snapshot instead of erroring.
        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 1);
        assert_eq!(source.calls(), 3);

        // Still stale, so the next lookup retries and succeeds.
        assert_eq!(directory.lookup("a@example.com").await.unwrap().id, 2);
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_misses_until_first_successful_refresh() {
        let (directory, source) = make_directory(vec![Step::Fail, Step::Fail]);

        assert!(directory.lookup("a@example.com").await.is_none());
        assert_eq!(source.calls(), 1);

        // Every call keeps retrying while no refresh has ever succeeded.
        assert!(directory.lookup("a@example.com").await.is_none());
        assert_eq!(source.calls(), 2);
    }
}
