//! Persisted state: the telemetry and alerts audit CSVs.

pub mod csv_log;

pub use csv_log::{
    csv_log, csv_log_with_capacity, AlertRow, CsvLogHandle, CsvLogWriter, TelemetryRow,
};
