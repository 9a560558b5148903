//! HTTP layer: status mapping, conditional GET, 429 retry loop, POST.
//!
//! This is the only place that looks at status codes.

use reqwest::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Lets the bucket operator match our calls to their logs.
const DEBUG_REQUEST_ID: &str = "X-Debug-ReqId";

use super::error::{StoreError, StoreResult};
use super::request_id::current_request_id;
use super::retry::{parse_retry_after, RetryPolicy};
use crate::timecard::Snapshot;

/// Result of one successful GET.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
  NotModified,
  Fetched {
    snapshot: Snapshot,
    etag: Option<String>,
  },
}

/// reqwest client plus the bucket location and retry policy.
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
  pub(crate) client: reqwest::Client,
  pub(crate) url: String,
  pub(crate) policy: RetryPolicy,
}

impl HttpBackend {
  /// GET the snapshot, retrying rate-limited attempts per the policy.
  pub(crate) async fn fetch(&self, etag: Option<&str>) -> StoreResult<FetchOutcome> {
    let mut attempt = 0;

    loop {
      attempt += 1;
      debug!(url = %self.url, attempt, "fetching snapshot");

      match self.fetch_once(etag).await {
        Ok(outcome) => return Ok(outcome),
        Err(StoreError::RateLimited { retry_after }) if self.policy.allows_retry(attempt) => {
          let delay = self.policy.delay(retry_after);
          warn!(
            attempt,
            max_attempts = self.policy.max_attempts,
            retry_after_secs = retry_after.map(|d| d.as_secs()),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "bucket rate limited, retrying"
          );
          tokio::time::sleep(delay).await;
        }
        Err(StoreError::RateLimited { .. }) => {
          error!(attempts = attempt, "bucket still rate limited, giving up");
          return Err(StoreError::Unavailable { attempts: attempt });
        }
        Err(e) => {
          error!(error = %e, attempt, "failed to read bucket");
          return Err(e);
        }
      }
    }
  }

  async fn fetch_once(&self, etag: Option<&str>) -> StoreResult<FetchOutcome> {
    let mut request = with_debug_id(self.client.get(&self.url));
    if let Some(etag) = etag {
      request = request.header(IF_NONE_MATCH, etag);
    }

    let response = request.send().await?;
    let status = response.status();

    match status {
      StatusCode::NOT_MODIFIED => {
        debug!("snapshot not modified (304)");
        Ok(FetchOutcome::NotModified)
      }

      StatusCode::TOO_MANY_REQUESTS => {
        let retry_after = response
          .headers()
          .get(RETRY_AFTER)
          .and_then(|v| v.to_str().ok())
          .and_then(parse_retry_after);

        Err(StoreError::RateLimited { retry_after })
      }

      s if s.is_success() => {
        let etag = response
          .headers()
          .get(ETAG)
          .and_then(|v| v.to_str().ok())
          .map(String::from);

        let body = response.bytes().await?;
        let snapshot: Snapshot =
          serde_json::from_slice(&body).map_err(|e| StoreError::InvalidResponse {
            message: e.to_string(),
          })?;

        info!(
          employees = snapshot.len(),
          bytes = body.len(),
          etag = etag.as_deref().unwrap_or(""),
          "snapshot fetched"
        );
        Ok(FetchOutcome::Fetched { snapshot, etag })
      }

      _ => {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(StoreError::Status {
          status: status.as_u16(),
          message,
        })
      }
    }
  }

  /// POST `payload` to `url` once.
  pub(crate) async fn post<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> StoreResult<()> {
    let body = serde_json::to_vec(payload).map_err(|e| StoreError::Encode {
      message: e.to_string(),
    })?;
    let bytes = body.len();

    let result = self.post_once(url, body).await;
    match &result {
      Ok(()) => info!(url = %url, bytes, "bucket updated"),
      Err(e) => error!(url = %url, bytes, error = %e, "failed to update bucket"),
    }
    result
  }

  async fn post_once(&self, url: &str, body: Vec<u8>) -> StoreResult<()> {
    let response = with_debug_id(self.client.post(url))
      .header(CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await?;

    let status = response.status();
    if status.is_success() {
      return Ok(());
    }

    let message = response.text().await.unwrap_or_else(|_| status.to_string());
    Err(StoreError::Status {
      status: status.as_u16(),
      message,
    })
  }
}

fn with_debug_id(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
  match current_request_id() {
    Some(id) => request.header(DEBUG_REQUEST_ID, id),
    None => request,
  }
}
