//! Clock in / clock out.

use serde::Serialize;

use super::types::{EmployeeRecord, LastAction, Shift};

/// Open shifts older than this are assumed to be a missed clock-out.
pub const DEFAULT_BACKUP_RUN_THRESHOLD_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClockOutcome {
  /// What the employee just did
  pub action: LastAction,
  /// A stale open shift was abandoned and a new one opened instead
  #[serde(rename = "backupRun")]
  pub backup_run: bool,
}

/// Toggle the employee's state at `now` (epoch seconds).
///
/// - out: append a shift with a placeholder `out` and switch to in.
/// - in: close the last shift at `now` and switch to out, unless that shift
///   has been open longer than `threshold_secs`. Then it is left as it is and
///   a new shift opens.
pub fn clock(record: &mut EmployeeRecord, now: i64, threshold_secs: i64) -> ClockOutcome {
  let mut backup_run = false;
  let mut action = record.last_action;

  if action == LastAction::In {
    match record.hours.last() {
      Some(open) if now - open.clock_in > threshold_secs => {
        action = LastAction::Out;
        backup_run = true;
      }
      Some(_) => {}
      // Hours were reset while the shift was open.
      None => action = LastAction::Out,
    }
  }

  match record.hours.last_mut() {
    Some(open) if action == LastAction::In => {
      open.clock_out = now;
      record.last_action = LastAction::Out;
    }
    _ => {
      record.hours.push(Shift::open(now));
      record.last_action = LastAction::In;
    }
  }

  ClockOutcome {
    action: record.last_action,
    backup_run,
  }
}
