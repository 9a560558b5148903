//! Snapshot document as stored in the bucket.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Every employee record, keyed by lowercase name.
///
/// Always read and written as one document.
pub type Snapshot = BTreeMap<String, EmployeeRecord>;

/// Whether the latest shift is open
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LastAction {
  In,
  #[default]
  Out,
}

impl LastAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::In => "in",
      Self::Out => "out",
    }
  }
}

/// One shift, in epoch seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shift {
  #[serde(rename = "in")]
  pub clock_in: i64,
  #[serde(rename = "out")]
  pub clock_out: i64,
}

impl Shift {
  /// A freshly opened shift. The `out` placeholder sits one second after `in`.
  pub fn open(now: i64) -> Self {
    Self {
      clock_in: now,
      clock_out: now + 1,
    }
  }

  pub fn seconds(&self) -> i64 {
    self.clock_out - self.clock_in
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmployeeRecord {
  /// Hex SHA-256 of the employee's password
  #[serde(rename = "pass", alias = "passwordHash")]
  pub password_hash: String,
  #[serde(default)]
  pub hours: Vec<Shift>,
  #[serde(rename = "lastAction", default)]
  pub last_action: LastAction,
  /// Fields this service does not use, kept so a write does not drop them
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl EmployeeRecord {
  #[cfg(test)]
  pub fn new(password_hash: impl Into<String>) -> Self {
    Self {
      password_hash: password_hash.into(),
      ..Default::default()
    }
  }
}

/// Normalize a submitted name to its snapshot key.
pub fn employee_key(name: &str) -> String {
  name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_wire_format() {
    let doc = json!({
      "alice": {
        "pass": "abc",
        "hours": [{"in": 100, "out": 101}],
        "lastAction": "in"
      }
    });

    let snapshot: Snapshot = serde_json::from_value(doc.clone()).unwrap();
    let alice = &snapshot["alice"];
    assert_eq!(alice.password_hash, "abc");
    assert_eq!(alice.hours, vec![Shift::open(100)]);
    assert_eq!(alice.last_action, LastAction::In);

    assert_eq!(serde_json::to_value(&snapshot).unwrap(), doc);
  }

  #[test]
  fn test_unknown_fields_survive() {
    let doc = json!({
      "bob": {"pass": "x", "hours": [], "lastAction": "out", "role": "picker"}
    });

    let snapshot: Snapshot = serde_json::from_value(doc.clone()).unwrap();
    assert_eq!(snapshot["bob"].extra["role"], "picker");
    assert_eq!(serde_json::to_value(&snapshot).unwrap(), doc);
  }

  #[test]
  fn test_password_hash_alias_and_defaults() {
    let record: EmployeeRecord = serde_json::from_value(json!({"passwordHash": "h"})).unwrap();
    assert_eq!(record.password_hash, "h");
    assert!(record.hours.is_empty());
    assert_eq!(record.last_action, LastAction::Out);
  }

  #[test]
  fn test_employee_key() {
    assert_eq!(employee_key("  Alice "), "alice");
  }
}
