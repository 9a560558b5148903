//! In-memory bucket for wiremock-backed tests.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use wiremock::{Request, Respond, ResponseTemplate};

use crate::timecard::auth::sha256_hex;

/// Serves whatever was last POSTed, with an ETag derived from it.
#[derive(Clone)]
pub(crate) struct EchoBucket {
  body: Arc<Mutex<Value>>,
}

impl EchoBucket {
  pub(crate) fn new(initial: Value) -> Self {
    Self {
      body: Arc::new(Mutex::new(initial)),
    }
  }

  pub(crate) fn current(&self) -> Value {
    self.body.lock().unwrap().clone()
  }
}

impl Respond for EchoBucket {
  fn respond(&self, request: &Request) -> ResponseTemplate {
    let mut body = self.body.lock().unwrap();
    if request.method.as_str() == "POST" {
      *body = serde_json::from_slice(&request.body).unwrap();
      return ResponseTemplate::new(200);
    }
    let etag = format!("\"{}\"", sha256_hex(&body.to_string()));
    let matches = request
      .headers
      .get("if-none-match")
      .and_then(|v| v.to_str().ok())
      == Some(etag.as_str());
    if matches {
      ResponseTemplate::new(304)
    } else {
      ResponseTemplate::new(200)
        .set_body_json(body.clone())
        .insert_header("etag", etag.as_str())
    }
  }
}
