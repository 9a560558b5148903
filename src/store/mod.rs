//! Remote bucket holding the timecard snapshot.
//!
//! This module provides the only path to the hosted JSON store:
//! - Reads are debounced and deduplicated, so at most one GET is in flight
//! - Reads revalidate with `If-None-Match` and yield `NotModified` on 304
//! - Rate-limited reads (429) are retried a bounded number of times
//! - Writes to the live bucket are serialized; `update` re-reads under the
//!   same lock so concurrent read-modify-writes never drop each other
//! - Outgoing calls carry the caller's request id as `X-Debug-ReqId`

mod client;
mod error;
mod http;
mod request_id;
mod retry;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{StoreClient, StoreSettings};
pub use error::StoreError;
pub use request_id::with_request_id;
pub use retry::{ClientEnvironment, RetryPolicy};
