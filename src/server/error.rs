use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::reporter::ReportError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("Malformed payload: {0}")]
  MalformedPayload(String),

  #[error("Unknown employee")]
  UnknownEmployee,

  #[error("Name or password is incorrect")]
  BadCredentials,

  #[error("Invalid time-code")]
  BadTimecode,

  #[error("Store error: {0}")]
  Store(#[from] StoreError),

  #[error("Report failed: {0}")]
  Report(#[from] ReportError),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = match &self {
      AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
      AppError::UnknownEmployee => StatusCode::NOT_FOUND,
      AppError::BadCredentials | AppError::BadTimecode => StatusCode::FORBIDDEN,
      AppError::Store(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
      AppError::Store(_) => StatusCode::BAD_GATEWAY,
      AppError::Report(ReportError::Read(e)) if e.is_unavailable() => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      AppError::Report(ReportError::NoBackupBucket) => StatusCode::INTERNAL_SERVER_ERROR,
      AppError::Report(_) => StatusCode::BAD_GATEWAY,
    };

    (status, self.to_string()).into_response()
  }
}
