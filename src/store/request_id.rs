//! Request id carried from an incoming request onto the store calls it makes.

use std::future::Future;

tokio::task_local! {
  static REQUEST_ID: String;
}

/// Id of the request the current task is serving, if any.
pub fn current_request_id() -> Option<String> {
  REQUEST_ID.try_with(Clone::clone).ok()
}

/// Run `fut` with `id` as the current request id.
pub async fn with_request_id<F: Future>(id: String, fut: F) -> F::Output {
  REQUEST_ID.scope(id, fut).await
}

pub(crate) async fn scoped<F: Future>(id: Option<String>, fut: F) -> F::Output {
  match id {
    Some(id) => with_request_id(id, fut).await,
    None => fut.await,
  }
}
