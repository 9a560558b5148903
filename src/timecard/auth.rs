//! Password digests and the hourly time-code.

use sha2::{Digest, Sha256};

use super::types::{employee_key, Snapshot};

const SECONDS_PER_HOUR: i64 = 60 * 60;

pub fn sha256_hex(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  hex::encode(hasher.finalize())
}

/// Digest stored in `pass` for a plain password.
pub fn password_digest(password: &str) -> String {
  sha256_hex(password)
}

/// True iff `username` exists and its stored digest matches `password`.
///
/// An unknown user is a failed check, not an error.
pub fn verify_password(snapshot: &Snapshot, username: &str, password: &str) -> bool {
  snapshot
    .get(&employee_key(username))
    .is_some_and(|record| record.password_hash == password_digest(password))
}

/// Hours since the epoch.
pub fn hour_bucket(unix_secs: i64) -> i64 {
  unix_secs.div_euclid(SECONDS_PER_HOUR)
}

/// Code printed on the QR poster for the hour containing `unix_secs`.
pub fn timecode(secret: &str, unix_secs: i64) -> String {
  sha256_hex(&format!("{}{}", hour_bucket(unix_secs), secret))
}

/// True iff `code` is the time-code for the current hour.
pub fn check_timecode(code: &str, secret: &str, unix_secs: i64) -> bool {
  code == timecode(secret, unix_secs)
}

/// Shorten a digest or code for logs.
pub fn mask(value: &str) -> String {
  if value.len() <= 8 {
    return "****".to_string();
  }
  let head: String = value.chars().take(4).collect();
  let tail: String = value
    .chars()
    .rev()
    .take(3)
    .collect::<Vec<_>>()
    .into_iter()
    .rev()
    .collect();
  format!("{}...{}", head, tail)
}
