//! Outgoing mail for the weekly report.

use serde::Serialize;
use std::future::Future;
use tracing::{info, warn};

/// A rendered message
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MailMessage {
  pub from: String,
  pub to: String,
  pub subject: String,
  pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
  #[error("mail relay request failed: {0}")]
  Network(#[from] reqwest::Error),

  #[error("mail relay rejected message: HTTP {status}: {message}")]
  Rejected { status: u16, message: String },
}

/// Anything that can deliver a `MailMessage`.
pub trait Mailer: Send + Sync {
  fn send(&self, message: &MailMessage) -> impl Future<Output = Result<(), MailError>> + Send;
}

/// Delivers through an HTTP mail relay: `POST {from,to,subject,html}`.
#[derive(Debug, Clone)]
pub struct HttpMailRelay {
  client: reqwest::Client,
  url: String,
  token: Option<String>,
}

impl HttpMailRelay {
  pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.into(),
      token,
    }
  }
}

impl Mailer for HttpMailRelay {
  async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
    let mut request = self.client.post(&self.url).json(message);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
      let message = response.text().await.unwrap_or_else(|_| status.to_string());
      return Err(MailError::Rejected {
        status: status.as_u16(),
        message,
      });
    }

    info!(status = status.as_u16(), "mail accepted by relay");
    Ok(())
  }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
  async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
    warn!(
      to = %message.to,
      subject = %message.subject,
      bytes = message.html.len(),
      "no mail relay configured, report not sent"
    );
    Ok(())
  }
}

/// The transport picked at start-up.
#[derive(Debug, Clone)]
pub enum MailTransport {
  Relay(HttpMailRelay),
  Log(LogMailer),
}

impl Mailer for MailTransport {
  async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
    match self {
      Self::Relay(relay) => relay.send(message).await,
      Self::Log(log) => log.send(message).await,
    }
  }
}
