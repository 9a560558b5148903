//! Timecard rules over an in-memory snapshot. Nothing here does I/O.

pub mod auth;
pub mod clock;
pub mod report;
mod types;

pub use types::{employee_key, Snapshot};
#[cfg(test)]
pub use types::{EmployeeRecord, LastAction, Shift};
