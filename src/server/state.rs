use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::mail::{HttpMailRelay, LogMailer, MailTransport};
use crate::reporter::ReportSettings;
use crate::store::StoreClient;

use super::request_tracing::BurstTracker;

const SECONDS_PER_HOUR: i64 = 60 * 60;

/// Shared by every handler.
pub struct AppState {
  pub store: StoreClient,
  pub mailer: MailTransport,
  pub report: ReportSettings,
  /// Secret mixed into the hourly time-code
  pub secret: String,
  pub utc_offset_secs: i64,
  pub backup_run_threshold_secs: i64,
  pub bursts: BurstTracker,
  pub request_id_seed: AtomicU64,
}

impl AppState {
  pub fn from_config(config: &Config) -> Result<Arc<Self>> {
    let store = StoreClient::new(config.store.settings())
      .map_err(|e| eyre!("Failed to create store client: {}", e))?;
    info!(url = %store.url(), "store client ready");

    if store.backup_url().is_none() {
      warn!("store.backup_url not set, /email will refuse to run");
    }

    Ok(Arc::new(Self {
      store,
      mailer: mail_transport(config),
      report: ReportSettings::new(config.mail.from.clone(), config.mail.to.clone()),
      secret: Config::get_secret()?,
      utc_offset_secs: hours_to_secs("timecard.utc_offset_hours", config.timecard.utc_offset_hours)?,
      backup_run_threshold_secs: hours_to_secs(
        "timecard.backup_run_threshold_hours",
        config.timecard.backup_run_threshold_hours,
      )?,
      bursts: BurstTracker::new(
        config.server.burst_threshold,
        Duration::from_secs(config.server.burst_window_secs),
      ),
      request_id_seed: AtomicU64::new(0),
    }))
  }

  /// Current time as recorded on shifts.
  pub fn clock_now(&self) -> i64 {
    chrono::Utc::now().timestamp() + self.utc_offset_secs
  }

  pub fn next_request_id(&self) -> String {
    let id = self.request_id_seed.fetch_add(1, Ordering::Relaxed);
    format!("req-{id:016x}")
  }
}

pub fn mail_transport(config: &Config) -> MailTransport {
  match &config.mail.relay_url {
    Some(url) => MailTransport::Relay(HttpMailRelay::new(url.clone(), Config::get_mail_token())),
    None => {
      warn!("mail.relay_url not set, reports will only be logged");
      MailTransport::Log(LogMailer)
    }
  }
}

fn hours_to_secs(field: &str, hours: i64) -> Result<i64> {
  hours
    .checked_mul(SECONDS_PER_HOUR)
    .ok_or_else(|| eyre!("{} is out of range: {}", field, hours))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hours_to_secs() {
    assert_eq!(hours_to_secs("h", -5).unwrap(), -18_000);
    assert_eq!(hours_to_secs("h", 12).unwrap(), 43_200);
    assert!(hours_to_secs("h", i64::MAX / 100).is_err());
  }
}
