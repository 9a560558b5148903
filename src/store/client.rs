//! Store client: one shared, debounced, ETag-aware read path plus plain writes.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, Instrument, Span};

use crate::query::{Debounce, SharedQuery};
use crate::timecard::Snapshot;

use super::error::{StoreError, StoreResult};
use super::http::{FetchOutcome, HttpBackend};
use super::request_id::{current_request_id, scoped};
use super::retry::RetryPolicy;

const USER_AGENT_VALUE: &str = concat!("timecard/", env!("CARGO_PKG_VERSION"));

/// What a read produced.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
  /// New snapshot from the bucket
  Fresh(Arc<Snapshot>),
  /// The bucket reports the copy we hold is still current
  NotModified,
}

/// Where the store lives and how reads behave.
#[derive(Debug, Clone)]
pub struct StoreSettings {
  pub url: String,
  pub backup_url: Option<String>,
  pub retry: RetryPolicy,
  pub debounce: Debounce,
}

impl StoreSettings {
  #[cfg(test)]
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      backup_url: None,
      retry: RetryPolicy::default(),
      debounce: Debounce::default(),
    }
  }
}

/// Last validated copy of the snapshot. The ETag is only kept next to the
/// body it validates.
#[derive(Debug, Default)]
struct CacheState {
  etag: Option<String>,
  snapshot: Option<Arc<Snapshot>>,
}

/// Client for the remote bucket.
///
/// Build one per process and share it; cloning shares the cache, the
/// in-flight slot and the write lock.
#[derive(Debug, Clone)]
pub struct StoreClient {
  http: HttpBackend,
  backup_url: Option<String>,
  cache: Arc<Mutex<CacheState>>,
  reads: Arc<SharedQuery<StoreResult<ReadOutcome>>>,
  /// Held for every write to the live bucket, including the read half of
  /// `update`.
  writes: Arc<tokio::sync::Mutex<()>>,
}

impl StoreClient {
  pub fn new(settings: StoreSettings) -> StoreResult<Self> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let client = reqwest::Client::builder()
      .default_headers(default_headers)
      .build()
      .map_err(|e| StoreError::Network {
        message: format!("failed to create HTTP client: {}", e),
      })?;

    Ok(Self {
      http: HttpBackend {
        client,
        url: settings.url,
        policy: settings.retry,
      },
      backup_url: settings.backup_url,
      cache: Arc::new(Mutex::new(CacheState::default())),
      reads: Arc::new(SharedQuery::new(settings.debounce)),
      writes: Arc::new(tokio::sync::Mutex::new(())),
    })
  }

  pub fn url(&self) -> &str {
    &self.http.url
  }

  pub fn backup_url(&self) -> Option<&str> {
    self.backup_url.as_deref()
  }

  /// Read the snapshot.
  ///
  /// Concurrent and closely spaced calls share one fetch. Yields
  /// `NotModified` when the bucket confirms the cached copy.
  pub async fn read(&self) -> StoreResult<ReadOutcome> {
    let http = self.http.clone();
    let cache = Arc::clone(&self.cache);
    // The fetch runs on its own task; carry the opener's request id and span.
    let request_id = current_request_id();
    let span = Span::current();

    self
      .reads
      .run(move || scoped(request_id, fetch_and_cache(http, cache)).instrument(span))
      .await
      .map_err(|e| StoreError::Interrupted { message: e.0 })?
  }

  /// Read and resolve `NotModified` to the cached body.
  pub async fn read_snapshot(&self) -> StoreResult<Arc<Snapshot>> {
    let outcome = self.read().await?;
    self.resolve(outcome)
  }

  /// Replace the live snapshot. One POST, no retry.
  ///
  /// Leaves the ETag alone, so the next read still revalidates.
  pub async fn write<T: Serialize + ?Sized>(&self, payload: &T) -> StoreResult<()> {
    let _writing = self.writes.lock().await;
    self.http.post(&self.http.url, payload).await
  }

  /// Read-modify-write of the live snapshot under the write lock.
  ///
  /// The read skips the debounce and the shared slot so it always sees the
  /// previous writer's result. Nothing is written when `change` fails.
  pub async fn update<R, E, F>(&self, change: F) -> Result<R, E>
  where
    F: FnOnce(&mut Snapshot) -> Result<R, E>,
    E: From<StoreError>,
  {
    let _writing = self.writes.lock().await;

    let outcome = fetch_and_cache(self.http.clone(), Arc::clone(&self.cache)).await?;
    let mut snapshot = (*self.resolve(outcome)?).clone();
    let value = change(&mut snapshot)?;

    self.http.post(&self.http.url, &snapshot).await?;
    Ok(value)
  }

  /// POST `payload` to another bucket, e.g. the weekly archive.
  pub async fn write_to<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> StoreResult<()> {
    self.http.post(url, payload).await
  }

  fn resolve(&self, outcome: ReadOutcome) -> StoreResult<Arc<Snapshot>> {
    match outcome {
      ReadOutcome::Fresh(snapshot) => Ok(snapshot),
      ReadOutcome::NotModified => lock(&self.cache).snapshot.clone().ok_or_else(|| {
        StoreError::InvalidResponse {
          message: "bucket answered 304 but no snapshot is cached".to_string(),
        }
      }),
    }
  }
}

async fn fetch_and_cache(
  http: HttpBackend,
  cache: Arc<Mutex<CacheState>>,
) -> StoreResult<ReadOutcome> {
  let etag = {
    let cache = lock(&cache);
    cache.snapshot.as_ref().and(cache.etag.clone())
  };

  match http.fetch(etag.as_deref()).await? {
    FetchOutcome::NotModified => Ok(ReadOutcome::NotModified),
    FetchOutcome::Fetched { snapshot, etag } => {
      let snapshot = Arc::new(snapshot);
      let mut cache = lock(&cache);
      debug!(etag = etag.as_deref().unwrap_or(""), "caching snapshot");
      cache.etag = etag;
      cache.snapshot = Some(Arc::clone(&snapshot));
      Ok(ReadOutcome::Fresh(snapshot))
    }
  }
}

fn lock(cache: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
  cache.lock().unwrap_or_else(PoisonError::into_inner)
}
