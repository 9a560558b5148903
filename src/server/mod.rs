//! HTTP surface: the clock page, credential checks, the raw snapshot and
//! the weekly report trigger.

mod error;
mod page;
mod request_tracing;
mod routes;
mod state;

pub use request_tracing::{DEFAULT_BURST_THRESHOLD, DEFAULT_BURST_WINDOW};
pub use state::{mail_transport, AppState};

use axum::{
  http::{header::CONTENT_TYPE, HeaderName, Method},
  middleware,
  routing::{get, post},
  Router,
};
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
  cors::{Any, CorsLayer},
  services::ServeDir,
  trace::TraceLayer,
};
use tracing::{error, info};

use crate::config::Config;

pub fn router(state: Arc<AppState>, public_dir: Option<&Path>) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([CONTENT_TYPE, HeaderName::from_static(request_tracing::REQUEST_ID_HEADER)])
    .expose_headers([HeaderName::from_static(request_tracing::REQUEST_ID_HEADER)])
    .max_age(Duration::from_secs(60 * 60));

  let mut app = Router::new()
    .route("/h", get(routes::clock_page))
    .route("/verify", get(routes::verify))
    .route("/timecheck", get(routes::timecheck))
    .route("/data.json", get(routes::data))
    .route("/updateData", post(routes::update_data))
    .route("/clock", post(routes::clock_action))
    .route("/email", get(routes::email))
    .route("/healthz", get(routes::healthz));

  if let Some(dir) = public_dir {
    app = app.fallback_service(ServeDir::new(dir));
  }

  app
    .layer(TraceLayer::new_for_http())
    .layer(middleware::from_fn_with_state(
      Arc::clone(&state),
      request_tracing::request_tracing,
    ))
    .layer(cors)
    .with_state(state)
}

/// Bind and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: &Config) -> Result<()> {
  info!("Initializing state...");
  let state = AppState::from_config(config)?;
  let app = router(state, config.server.public_dir.as_deref());

  let address = format!("{}:{}", config.server.host, config.server.port);
  let listener = TcpListener::bind(&address)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", address, e))?;
  info!("Server running on {address}");

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  info!("Server shut down");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    match tokio::signal::ctrl_c().await {
      Ok(()) => info!("Received Ctrl+C, shutting down"),
      Err(e) => {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut stream) => {
        stream.recv().await;
        info!("Received terminate signal, shutting down");
      }
      Err(e) => {
        error!(error = %e, "Failed to install signal handler");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
}
