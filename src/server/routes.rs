use axum::{
  body::Bytes,
  extract::{Query, State},
  response::Html,
  Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::reporter::{run_weekly_report, ReportSummary};
use crate::timecard::auth::{check_timecode, mask, verify_password};
use crate::timecard::clock::{clock, ClockOutcome};
use crate::timecard::{employee_key, Snapshot};

use super::error::AppError;
use super::page::render_clock_page;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CodeParams {
  #[serde(default)]
  code: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
  username: Option<String>,
  pass: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimecheckParams {
  hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateData {
  data: Snapshot,
}

#[derive(Debug, Deserialize)]
struct ClockRequest {
  username: String,
  pass: String,
  code: String,
}

pub async fn clock_page(Query(params): Query<CodeParams>) -> Html<String> {
  Html(render_clock_page(&params.code))
}

pub async fn verify(
  State(state): State<Arc<AppState>>,
  Query(params): Query<VerifyParams>,
) -> Result<Json<bool>, AppError> {
  let (Some(username), Some(pass)) = (params.username, params.pass) else {
    return Ok(Json(false));
  };

  let snapshot = state.store.read_snapshot().await?;
  Ok(Json(verify_password(&snapshot, &username, &pass)))
}

pub async fn timecheck(
  State(state): State<Arc<AppState>>,
  Query(params): Query<TimecheckParams>,
) -> Json<bool> {
  let valid = params
    .hash
    .is_some_and(|hash| check_timecode(&hash, &state.secret, chrono::Utc::now().timestamp()));
  Json(valid)
}

pub async fn data(State(state): State<Arc<AppState>>) -> Result<Json<Snapshot>, AppError> {
  let snapshot = state.store.read_snapshot().await?;
  Ok(Json((*snapshot).clone()))
}

pub async fn update_data(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<bool>, AppError> {
  let UpdateData { data } = parse_body(&body)?;
  state.store.write(&data).await?;
  info!(employees = data.len(), "snapshot replaced");
  Ok(Json(true))
}

/// Verify, check the time-code, toggle the employee and write the snapshot.
///
/// Runs as one `update`, so concurrent punches are applied one after another
/// to the latest snapshot.
pub async fn clock_action(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<ClockOutcome>, AppError> {
  let request: ClockRequest = parse_body(&body)?;
  let key = employee_key(&request.username);

  if !check_timecode(&request.code, &state.secret, chrono::Utc::now().timestamp()) {
    warn!(employee = %key, code = %mask(&request.code), "clock attempt with stale time-code");
    return Err(AppError::BadTimecode);
  }

  let now = state.clock_now();
  let outcome = state
    .store
    .update(|snapshot| {
      if !snapshot.contains_key(&key) {
        warn!(employee = %key, "clock attempt for unknown employee");
        return Err(AppError::UnknownEmployee);
      }
      if !verify_password(snapshot, &key, &request.pass) {
        warn!(employee = %key, "clock attempt with wrong password");
        return Err(AppError::BadCredentials);
      }
      match snapshot.get_mut(&key) {
        Some(record) => Ok(clock(record, now, state.backup_run_threshold_secs)),
        None => Err(AppError::UnknownEmployee),
      }
    })
    .await?;

  info!(
    employee = %key,
    action = outcome.action.as_str(),
    backup_run = outcome.backup_run,
    "clocked"
  );
  Ok(Json(outcome))
}

pub async fn email(State(state): State<Arc<AppState>>) -> Result<Json<ReportSummary>, AppError> {
  let summary = run_weekly_report(&state.store, &state.mailer, &state.report).await?;
  Ok(Json(summary))
}

pub async fn healthz() -> &'static str {
  "ok"
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
  serde_json::from_slice(body).map_err(|e| AppError::MalformedPayload(e.to_string()))
}
