//! Shared async query with debounce and in-flight deduplication.
//!
//! A `SharedQuery<T>` owns one slot. The first caller opens it and spawns the
//! fetch; every caller that arrives while the slot is open gets the same
//! result instead of starting another fetch. Before fetching, the task waits
//! for a quiet period so a burst of calls collapses into one fetch.
//!
//! # Example
//!
//! ```ignore
//! let query = SharedQuery::new(Debounce::default());
//!
//! // Two handlers racing each other issue a single fetch.
//! let (a, b) = tokio::join!(
//!     query.run(|| async { fetch_snapshot().await }),
//!     query.run(|| async { fetch_snapshot().await }),
//! );
//! ```
//!
//! The fetch runs on its own task. A caller dropping its future does not
//! cancel it.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Quiet period used to coalesce bursts of reads.
pub const DEFAULT_QUIET: Duration = Duration::from_millis(300);

/// Longest a burst can postpone the fetch.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Debounce settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
  /// Each call made during the quiet period extends it by this much
  pub quiet: Duration,
  /// Upper bound on the wait, measured from the call that opened the slot
  pub max_wait: Duration,
}

impl Debounce {
  pub fn new(quiet: Duration, max_wait: Duration) -> Self {
    Self {
      quiet,
      max_wait: max_wait.max(quiet),
    }
  }

  /// No quiet period: fetch as soon as the slot opens.
  #[cfg(test)]
  pub fn none() -> Self {
    Self::new(Duration::ZERO, Duration::ZERO)
  }
}

impl Default for Debounce {
  fn default() -> Self {
    Self::new(DEFAULT_QUIET, DEFAULT_MAX_WAIT)
  }
}

/// Where the slot is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
  /// No fetch pending
  Idle,
  /// Waiting for the burst to go quiet
  Debouncing,
  /// The fetch itself is running
  Fetching,
}

/// The shared fetch task ended without a value (it panicked or was aborted).
#[derive(Debug, Clone, thiserror::Error)]
#[error("shared query task failed: {0}")]
pub struct QueryError(pub String);

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, QueryError>>>;

struct Slot<T> {
  pending: Option<SharedResult<T>>,
  phase: QueryPhase,
  opened_at: Instant,
  last_call: Instant,
}

/// One-at-a-time async query shared by all callers.
pub struct SharedQuery<T> {
  slot: Arc<Mutex<Slot<T>>>,
  debounce: Debounce,
}

impl<T> SharedQuery<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub fn new(debounce: Debounce) -> Self {
    let now = Instant::now();
    Self {
      slot: Arc::new(Mutex::new(Slot {
        pending: None,
        phase: QueryPhase::Idle,
        opened_at: now,
        last_call: now,
      })),
      debounce,
    }
  }

  #[cfg(test)]
  pub fn phase(&self) -> QueryPhase {
    lock(&self.slot).phase
  }

  /// Join the pending fetch, or open the slot and spawn `fetcher`.
  ///
  /// `fetcher` is only called when this call opens the slot.
  pub async fn run<F, Fut>(&self, fetcher: F) -> Result<T, QueryError>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
  {
    let pending = {
      let mut slot = lock(&self.slot);
      let now = Instant::now();

      match slot.pending.clone() {
        Some(pending) => {
          if slot.phase == QueryPhase::Debouncing {
            slot.last_call = now;
          }
          debug!(phase = ?slot.phase, "joining pending query");
          pending
        }
        None => {
          slot.phase = QueryPhase::Debouncing;
          slot.opened_at = now;
          slot.last_call = now;

          // The task locks the slot first thing, so it waits until the
          // pending handle below is in place.
          let task = tokio::spawn(settle(Arc::clone(&self.slot), self.debounce, fetcher));
          let pending = async move {
            task.await.map_err(|e| {
              warn!(error = %e, "shared query task did not complete");
              QueryError(e.to_string())
            })
          }
          .boxed()
          .shared();

          slot.pending = Some(pending.clone());
          pending
        }
      }
    };

    pending.await
  }
}

/// Body of the spawned task: wait out the burst, fetch, release the slot.
async fn settle<T, F, Fut>(slot: Arc<Mutex<Slot<T>>>, debounce: Debounce, fetcher: F) -> T
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = T>,
{
  let _release = Release {
    slot: Arc::clone(&slot),
  };

  loop {
    let deadline = {
      let mut guard = lock(&slot);
      let quiet_end = guard.last_call + debounce.quiet;
      let deadline = quiet_end.min(guard.opened_at + debounce.max_wait);
      if Instant::now() >= deadline {
        guard.phase = QueryPhase::Fetching;
        break;
      }
      deadline
    };
    tokio::time::sleep_until(deadline).await;
  }

  fetcher().await
}

/// Clears the slot when the task ends, whether it returned or unwound.
struct Release<T> {
  slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Drop for Release<T> {
  fn drop(&mut self) {
    let mut slot = lock(&self.slot);
    slot.pending = None;
    slot.phase = QueryPhase::Idle;
  }
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
  slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> std::fmt::Debug for SharedQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SharedQuery")
      .field("phase", &lock(&self.slot).phase)
      .field("debounce", &self.debounce)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::future::join_all;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
  }

  fn counting(
    counter: &Arc<AtomicU32>,
    work: Duration,
  ) -> impl FnOnce() -> BoxFuture<'static, u32> + Send + 'static {
    let counter = Arc::clone(counter);
    move || {
      async move {
        tokio::time::sleep(work).await;
        counter.fetch_add(1, Ordering::SeqCst) + 1
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_burst_collapses_into_one_fetch() {
    let query = Arc::new(SharedQuery::new(Debounce::new(ms(300), ms(2000))));
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..5u64).map(|i| {
      let query = Arc::clone(&query);
      let fetch = counting(&counter, ms(10));
      async move {
        tokio::time::sleep(ms(100 * i)).await;
        query.run(fetch).await
      }
    });

    let results = join_all(calls).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap(), 1);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_call_during_fetch_joins_it() {
    let query = Arc::new(SharedQuery::new(Debounce::none()));
    let counter = Arc::new(AtomicU32::new(0));

    let first = {
      let query = Arc::clone(&query);
      let fetch = counting(&counter, ms(1000));
      tokio::spawn(async move { query.run(fetch).await })
    };

    tokio::time::sleep(ms(500)).await;
    assert_eq!(query.phase(), QueryPhase::Fetching);

    let second = query.run(counting(&counter, ms(1000))).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first, 1);
    assert_eq!(second, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slot_reopens_after_settle() {
    let query = SharedQuery::new(Debounce::new(ms(300), ms(2000)));
    let counter = Arc::new(AtomicU32::new(0));

    assert_eq!(query.run(counting(&counter, ms(10))).await.unwrap(), 1);
    assert_eq!(query.phase(), QueryPhase::Idle);

    assert_eq!(query.run(counting(&counter, ms(10))).await.unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_quiet_period_delays_fetch() {
    let query = SharedQuery::new(Debounce::new(ms(300), ms(2000)));
    let counter = Arc::new(AtomicU32::new(0));

    let start = Instant::now();
    query.run(counting(&counter, Duration::ZERO)).await.unwrap();

    assert!(start.elapsed() >= ms(300));
  }

  #[tokio::test(start_paused = true)]
  async fn test_max_wait_bounds_a_steady_stream() {
    let query = Arc::new(SharedQuery::new(Debounce::new(ms(300), ms(1000))));
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..15u64).map(|i| {
      let query = Arc::clone(&query);
      let fetch = counting(&counter, Duration::ZERO);
      async move {
        tokio::time::sleep(ms(200 * i)).await;
        query.run(fetch).await
      }
    });
    join_all(calls).await;

    // Calls every 200ms never go quiet for 300ms; only the cap lets fetches start.
    assert!(counter.load(Ordering::SeqCst) >= 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_panicking_fetch_releases_slot() {
    let query: SharedQuery<u32> = SharedQuery::new(Debounce::none());

    let result = query
      .run(|| async {
        if true {
          panic!("boom");
        }
        0
      })
      .await;
    assert!(result.is_err());
    assert_eq!(query.phase(), QueryPhase::Idle);

    assert_eq!(query.run(|| async { 7 }).await.unwrap(), 7);
  }
}
