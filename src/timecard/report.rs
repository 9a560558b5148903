//! Weekly hour summaries.

use chrono::DateTime;
use serde::Serialize;

use super::types::{EmployeeRecord, Shift, Snapshot};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TABLE_STYLE: &str = "<style>td, th {border: 1px solid #dddddd;text-align: left;padding: 8px;}tr:nth-child(even) {background-color: #dddddd;}</style>";

/// One table row
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ShiftRow {
  pub clock_in: String,
  pub clock_out: String,
  pub hours: f64,
}

/// Everything mailed for one employee
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmployeeReport {
  pub employee: String,
  pub rows: Vec<ShiftRow>,
  pub total_hours: f64,
}

impl EmployeeReport {
  pub fn new(employee: &str, record: &EmployeeRecord) -> Self {
    let rows: Vec<ShiftRow> = record.hours.iter().map(ShiftRow::from).collect();
    let total = rows.iter().map(|r| r.hours).sum::<f64>();

    Self {
      employee: employee.to_string(),
      rows,
      total_hours: round_tenths(total),
    }
  }

  pub fn subject(&self) -> String {
    format!("{}'s Hours", self.employee)
  }

  /// HTML body: shift table and total.
  pub fn to_html(&self) -> String {
    let mut html = String::from(TABLE_STYLE);
    html.push_str(
      "<table style='font-size: 50%; border-collapse: collapse; width: 100%;'>\
       <tr><th>In</th><th>Out</th><th>Hours</th></tr>",
    );

    for row in &self.rows {
      html.push_str(&format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
        row.clock_in, row.clock_out, row.hours
      ));
    }

    html.push_str(&format!(
      "</table><br><br><h2>Total Hours: {}</h2>",
      self.total_hours
    ));
    html
  }
}

impl From<&Shift> for ShiftRow {
  fn from(shift: &Shift) -> Self {
    Self {
      clock_in: format_timestamp(shift.clock_in),
      clock_out: format_timestamp(shift.clock_out),
      hours: shift_hours(shift),
    }
  }
}

/// Reports for every employee, in key order.
pub fn build_reports(snapshot: &Snapshot) -> Vec<EmployeeReport> {
  snapshot
    .iter()
    .map(|(name, record)| EmployeeReport::new(name, record))
    .collect()
}

/// Shift length rounded to the minute, then to a tenth of an hour.
pub fn shift_hours(shift: &Shift) -> f64 {
  let minutes = round_half_up(shift.seconds() as f64 / 60.0);
  round_tenths(minutes / 60.0)
}

/// Drop from `live` the shifts that went out in `reported`.
///
/// A shift is dropped only if it still sits at the same position with the
/// same times. Shifts recorded or closed after the report was built stay for
/// the next one. Everything other than `hours` is left alone.
pub fn clear_reported_hours(live: &mut Snapshot, reported: &Snapshot) {
  for (name, record) in live.iter_mut() {
    let Some(sent) = reported.get(name) else {
      continue;
    };
    let mut index = 0;
    record.hours.retain(|shift| {
      let keep = sent.hours.get(index) != Some(shift);
      index += 1;
      keep
    });
  }
}

fn format_timestamp(secs: i64) -> String {
  DateTime::from_timestamp(secs, 0)
    .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
    .unwrap_or_else(|| secs.to_string())
}

fn round_half_up(x: f64) -> f64 {
  (x + 0.5).floor()
}

fn round_tenths(x: f64) -> f64 {
  round_half_up(x * 10.0) / 10.0
}
