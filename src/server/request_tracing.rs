use axum::{
  body::Body,
  extract::{ConnectInfo, State},
  http::{HeaderMap, HeaderValue, Request},
  middleware::Next,
  response::Response,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{warn, Instrument};

use crate::store::with_request_id;

use super::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const MAX_REQUEST_ID_LEN: usize = 64;
const MAX_TRACKED_CLIENTS: usize = 1024;

pub const DEFAULT_BURST_THRESHOLD: usize = 10;
pub const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(10);

/// Gives every request a span with a request id, echoes the id back and hands
/// it to the store calls the handler makes. Warns when one client sends a
/// burst of requests.
pub(crate) async fn request_tracing(
  State(state): State<Arc<AppState>>,
  request: Request<Body>,
  next: Next,
) -> Response {
  let request_id = incoming_request_id(request.headers()).unwrap_or_else(|| state.next_request_id());
  let client = client_addr(&request);
  let hits = state.bursts.record(&client, Instant::now());

  let span = tracing::info_span!(
    "http.request",
    request_id = %request_id,
    method = %request.method(),
    route = %request.uri().path(),
    client = %client,
  );
  if state.bursts.is_burst(hits) {
    span.in_scope(|| {
      warn!(
        hits,
        window_secs = state.bursts.window.as_secs(),
        "burst of requests from one client"
      )
    });
  }

  let mut response = with_request_id(request_id.clone(), next.run(request))
    .instrument(span)
    .await;
  if let Ok(value) = HeaderValue::from_str(&request_id) {
    response.headers_mut().insert(REQUEST_ID_HEADER, value);
  }
  response
}

fn incoming_request_id(headers: &HeaderMap) -> Option<String> {
  headers
    .get(REQUEST_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
    .map(ToString::to_string)
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_addr(request: &Request<Body>) -> String {
  request
    .headers()
    .get(FORWARDED_FOR_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(',').next())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(ToString::to_string)
    .or_else(|| {
      request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
    .unwrap_or_else(|| "unknown".to_string())
}

/// Sliding-window request counts per client.
#[derive(Debug)]
pub struct BurstTracker {
  pub threshold: usize,
  pub window: Duration,
  hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for BurstTracker {
  fn default() -> Self {
    Self::new(DEFAULT_BURST_THRESHOLD, DEFAULT_BURST_WINDOW)
  }
}

impl BurstTracker {
  pub fn new(threshold: usize, window: Duration) -> Self {
    Self {
      threshold,
      window,
      hits: Mutex::new(HashMap::new()),
    }
  }

  /// Count a request from `client` at `now`; returns its requests within the window.
  pub fn record(&self, client: &str, now: Instant) -> usize {
    let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);

    if hits.len() >= MAX_TRACKED_CLIENTS && !hits.contains_key(client) {
      hits.retain(|_, times| {
        times
          .back()
          .is_some_and(|last| now.duration_since(*last) <= self.window)
      });
    }

    let times = hits.entry(client.to_string()).or_default();
    times.push_back(now);
    while times
      .front()
      .is_some_and(|first| now.duration_since(*first) > self.window)
    {
      times.pop_front();
    }
    times.len()
  }

  pub fn is_burst(&self, hits: usize) -> bool {
    self.threshold > 0 && hits >= self.threshold
  }

  #[cfg(test)]
  fn tracked(&self) -> usize {
    self.hits.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_burst_counts_within_window() {
    let tracker = BurstTracker::new(3, Duration::from_secs(10));
    let start = Instant::now();

    assert_eq!(tracker.record("1.2.3.4", start), 1);
    assert_eq!(tracker.record("1.2.3.4", start + Duration::from_secs(1)), 2);
    assert_eq!(tracker.record("5.6.7.8", start + Duration::from_secs(1)), 1);
    let hits = tracker.record("1.2.3.4", start + Duration::from_secs(2));

    assert_eq!(hits, 3);
    assert!(tracker.is_burst(hits));
  }

  #[test]
  fn test_old_requests_leave_the_window() {
    let tracker = BurstTracker::new(3, Duration::from_secs(10));
    let start = Instant::now();

    tracker.record("1.2.3.4", start);
    tracker.record("1.2.3.4", start + Duration::from_secs(1));
    let hits = tracker.record("1.2.3.4", start + Duration::from_secs(12));

    assert_eq!(hits, 1);
    assert!(!tracker.is_burst(hits));
  }

  #[test]
  fn test_idle_clients_are_pruned() {
    let tracker = BurstTracker::new(3, Duration::from_secs(10));
    let start = Instant::now();
    for i in 0..MAX_TRACKED_CLIENTS {
      tracker.record(&format!("10.0.{}.{}", i / 256, i % 256), start);
    }

    tracker.record("1.2.3.4", start + Duration::from_secs(60));

    assert_eq!(tracker.tracked(), 1);
  }

  #[test]
  fn test_incoming_request_id() {
    let mut headers = HeaderMap::new();
    assert_eq!(incoming_request_id(&headers), None);

    headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" req-abc "));
    assert_eq!(incoming_request_id(&headers).as_deref(), Some("req-abc"));

    let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
    headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
    assert_eq!(incoming_request_id(&headers), None);
  }

  #[test]
  fn test_client_addr_prefers_forwarded_for() {
    let request = Request::builder()
      .header(FORWARDED_FOR_HEADER, "203.0.113.9, 10.0.0.1")
      .body(Body::empty())
      .unwrap();
    assert_eq!(client_addr(&request), "203.0.113.9");

    let mut request = Request::builder().body(Body::empty()).unwrap();
    request
      .extensions_mut()
      .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
    assert_eq!(client_addr(&request), "192.0.2.1");

    let request = Request::builder().body(Body::empty()).unwrap();
    assert_eq!(client_addr(&request), "unknown");
  }
}
