//! Weekly run: mail every employee's hours, archive the snapshot, reset it.

use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::mail::{MailMessage, Mailer};
use crate::store::{StoreClient, StoreError};
use crate::timecard::report::{build_reports, clear_reported_hours};

const DEFAULT_ARCHIVE_ATTEMPTS: u32 = 3;
const DEFAULT_ARCHIVE_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
  #[error("could not read snapshot: {0}")]
  Read(#[source] StoreError),

  #[error("no backup bucket configured")]
  NoBackupBucket,

  /// Live data was left untouched.
  #[error("archive failed after {attempts} attempts: {source}")]
  Archive {
    attempts: u32,
    #[source]
    source: StoreError,
  },

  /// The archive exists but hours were not cleared; a rerun archives again.
  #[error("archived, but resetting live snapshot failed: {0}")]
  Reset(#[source] StoreError),
}

/// Who receives the report and how hard to try the archive.
#[derive(Debug, Clone)]
pub struct ReportSettings {
  pub from: String,
  pub to: String,
  pub archive_attempts: u32,
  pub archive_backoff: Duration,
}

impl ReportSettings {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      archive_attempts: DEFAULT_ARCHIVE_ATTEMPTS,
      archive_backoff: DEFAULT_ARCHIVE_BACKOFF,
    }
  }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportSummary {
  pub employees: usize,
  pub mailed: usize,
  pub mail_failures: Vec<String>,
}

/// Run the weekly report.
///
/// Order: read, mail each employee, archive to the backup bucket, clear the
/// reported hours. The reset only runs once the archive has been written.
pub async fn run_weekly_report<M: Mailer>(
  store: &StoreClient,
  mailer: &M,
  settings: &ReportSettings,
) -> Result<ReportSummary, ReportError> {
  let backup_url = store
    .backup_url()
    .ok_or(ReportError::NoBackupBucket)?
    .to_string();

  let snapshot = store.read_snapshot().await.map_err(ReportError::Read)?;
  let reports = build_reports(&snapshot);
  info!(employees = reports.len(), "starting weekly report");

  let mut mailed = 0;
  let mut mail_failures = Vec::new();
  for report in &reports {
    let message = MailMessage {
      from: settings.from.clone(),
      to: settings.to.clone(),
      subject: report.subject(),
      html: report.to_html(),
    };

    match mailer.send(&message).await {
      Ok(()) => {
        mailed += 1;
        info!(
          employee = %report.employee,
          shifts = report.rows.len(),
          total_hours = report.total_hours,
          "report sent"
        );
      }
      Err(e) => {
        error!(employee = %report.employee, error = %e, "failed to send report");
        mail_failures.push(report.employee.clone());
      }
    }
  }

  archive(store, &backup_url, &*snapshot, settings).await?;

  // Punches made while mailing or archiving are not in `snapshot`; reset
  // against the latest live copy so they survive.
  store
    .update(|live| {
      clear_reported_hours(live, &snapshot);
      Ok::<_, StoreError>(())
    })
    .await
    .map_err(ReportError::Reset)?;
  info!("reported hours cleared");

  Ok(ReportSummary {
    employees: reports.len(),
    mailed,
    mail_failures,
  })
}

async fn archive<T: Serialize + ?Sized>(
  store: &StoreClient,
  url: &str,
  payload: &T,
  settings: &ReportSettings,
) -> Result<(), ReportError> {
  let attempts = settings.archive_attempts.max(1);
  let mut attempt = 0;

  loop {
    attempt += 1;
    match store.write_to(url, payload).await {
      Ok(()) => {
        info!(attempt, "snapshot archived");
        return Ok(());
      }
      Err(source) if attempt >= attempts => {
        return Err(ReportError::Archive {
          attempts: attempt,
          source,
        });
      }
      Err(e) => {
        warn!(attempt, error = %e, "archive failed, retrying");
        tokio::time::sleep(settings.archive_backoff).await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mail::MailError;
  use crate::query::Debounce;
  use crate::store::testing::EchoBucket;
  use crate::store::StoreSettings;
  use crate::timecard::clock::{clock, DEFAULT_BACKUP_RUN_THRESHOLD_SECS};
  use serde_json::json;
  use std::sync::Mutex;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[derive(Default)]
  struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    fail_for: Option<String>,
  }

  impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
      if self
        .fail_for
        .as_deref()
        .is_some_and(|name| message.subject.starts_with(name))
      {
        return Err(MailError::Rejected {
          status: 500,
          message: "down".to_string(),
        });
      }
      self.sent.lock().unwrap().push(message.clone());
      Ok(())
    }
  }

  fn store(server: &MockServer) -> StoreClient {
    let mut settings = StoreSettings::new(format!("{}/basket/Timecard", server.uri()));
    settings.backup_url = Some(format!("{}/basket/Backup", server.uri()));
    settings.debounce = Debounce::none();
    StoreClient::new(settings).unwrap()
  }

  fn settings() -> ReportSettings {
    ReportSettings {
      archive_backoff: Duration::from_millis(10),
      ..ReportSettings::new("farm@example.com", "office@example.com")
    }
  }

  fn live_doc() -> serde_json::Value {
    json!({
      "alice": {"pass": "a", "hours": [{"in": 0, "out": 28800}], "lastAction": "out"},
      "bob": {"pass": "b", "hours": [{"in": 3600, "out": 3601}], "lastAction": "in"}
    })
  }

  fn reset_doc() -> serde_json::Value {
    json!({
      "alice": {"pass": "a", "hours": [], "lastAction": "out"},
      "bob": {"pass": "b", "hours": [], "lastAction": "in"}
    })
  }

  async fn mount_live(server: &MockServer) {
    Mock::given(method("GET"))
      .and(path("/basket/Timecard"))
      .respond_with(ResponseTemplate::new(200).set_body_json(live_doc()))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn test_mails_archives_then_resets() {
    let server = MockServer::start().await;
    mount_live(&server).await;
    Mock::given(method("POST"))
      .and(path("/basket/Backup"))
      .and(body_json(live_doc()))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/basket/Timecard"))
      .and(body_json(reset_doc()))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let mailer = RecordingMailer::default();
    let summary = run_weekly_report(&store(&server), &mailer, &settings())
      .await
      .unwrap();

    assert_eq!(summary.employees, 2);
    assert_eq!(summary.mailed, 2);
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "alice's Hours");
    assert!(sent[0].html.contains("Total Hours: 8"));
    assert_eq!(sent[1].to, "office@example.com");
  }

  #[tokio::test]
  async fn test_archive_failure_keeps_live_data() {
    let server = MockServer::start().await;
    mount_live(&server).await;
    Mock::given(method("POST"))
      .and(path("/basket/Backup"))
      .respond_with(ResponseTemplate::new(503))
      .expect(3)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/basket/Timecard"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let result = run_weekly_report(&store(&server), &RecordingMailer::default(), &settings()).await;

    assert!(matches!(
      result,
      Err(ReportError::Archive { attempts: 3, .. })
    ));
  }

  #[tokio::test]
  async fn test_archive_retry_then_success() {
    let server = MockServer::start().await;
    mount_live(&server).await;
    Mock::given(method("POST"))
      .and(path("/basket/Backup"))
      .respond_with(ResponseTemplate::new(503))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/basket/Backup"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/basket/Timecard"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let result = run_weekly_report(&store(&server), &RecordingMailer::default(), &settings()).await;

    assert!(result.is_ok());
  }

  #[tokio::test]
  async fn test_mail_failure_is_not_fatal() {
    let server = MockServer::start().await;
    mount_live(&server).await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;

    let mailer = RecordingMailer {
      fail_for: Some("bob".to_string()),
      ..Default::default()
    };
    let summary = run_weekly_report(&store(&server), &mailer, &settings())
      .await
      .unwrap();

    assert_eq!(summary.mailed, 1);
    assert_eq!(summary.mail_failures, vec!["bob".to_string()]);
  }

  #[tokio::test]
  async fn test_unavailable_snapshot_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let result = run_weekly_report(&store(&server), &RecordingMailer::default(), &settings()).await;

    assert!(matches!(result, Err(ReportError::Read(_))));
  }

  /// Clocks alice in while her report is being sent.
  struct PunchingMailer {
    store: StoreClient,
  }

  impl Mailer for PunchingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
      if message.subject.starts_with("alice") {
        self
          .store
          .update(|snapshot| {
            let alice = snapshot.get_mut("alice").unwrap();
            clock(alice, 50_000, DEFAULT_BACKUP_RUN_THRESHOLD_SECS);
            Ok::<_, StoreError>(())
          })
          .await
          .unwrap();
      }
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_punch_during_report_survives_reset() {
    let server = MockServer::start().await;
    let bucket = EchoBucket::new(live_doc());
    Mock::given(path("/basket/Timecard"))
      .respond_with(bucket.clone())
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/basket/Backup"))
      .and(body_json(live_doc()))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    let store = store(&server);
    let mailer = PunchingMailer {
      store: store.clone(),
    };
    run_weekly_report(&store, &mailer, &settings()).await.unwrap();

    assert_eq!(
      bucket.current(),
      json!({
        "alice": {"pass": "a", "hours": [{"in": 50_000, "out": 50_001}], "lastAction": "in"},
        "bob": {"pass": "b", "hours": [], "lastAction": "in"}
      })
    );
  }
}
