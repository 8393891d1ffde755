// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-of-attempt summary logging.

use tracing::{debug, info, warn};

use crate::types::{OperationRecord, OperationStatus};

/// Log the outcome of one attempt.
///
/// Always emits one summary line. Attempts that ended with an error also dump
/// their log entries and step data at debug, and the error at warn.
pub fn log_record(record: &OperationRecord) {
    let succeeded = record.status == OperationStatus::Completed;

    info!(
        operation_id = %record.id,
        operation = %record.operation_name,
        status = %record.status,
        duration_ms = record.duration_in_ms,
        steps = record.step_data_entries.len(),
        started = %record.started.to_rfc3339(),
        "{} {}",
        if succeeded { "✓" } else { "✗" },
        record.operation_name
    );

    let (Some(error), Some(finished)) = (&record.error, record.finished) else {
        return;
    };

    for entry in &record.log_entries {
        debug!(
            operation_id = %record.id,
            at = %entry.date_time.format("%H:%M:%S"),
            "{}",
            entry.message
        );
    }
    debug!(
        operation_id = %record.id,
        at = %finished.format("%H:%M:%S"),
        "Stall"
    );

    for entry in &record.step_data_entries {
        debug!(
            operation_id = %record.id,
            step = %entry.name,
            data = %entry.data,
            "Step data"
        );
    }

    warn!(
        operation_id = %record.id,
        operation = %record.operation_name,
        status = %record.status,
        error = %error,
        "Operation attempt ended with an error"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogEntry, StepDataEntry};
    use chrono::Utc;
    use serde_json::json;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(record: &OperationRecord) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || log_record(record));
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn finished(status: OperationStatus) -> OperationRecord {
        let mut record = OperationRecord::new("op-1", "payment", json!({}));
        record.status = status;
        record.finished = Some(Utc::now());
        record.log_entries.push(LogEntry {
            message: "charging".to_string(),
            date_time: Utc::now(),
        });
        record.step_data_entries.push(StepDataEntry {
            name: "reserve".to_string(),
            data: json!({"sku": "A-1"}),
        });
        record
    }

    #[test]
    fn test_completed_record_logs_only_the_summary() {
        let output = capture(&finished(OperationStatus::Completed));

        assert!(output.contains("✓ payment"), "{output}");
        assert!(output.contains("status=completed"), "{output}");
        assert_eq!(output.lines().count(), 1, "{output}");
        assert!(!output.contains("ended with an error"));
        assert!(!output.contains("Step data"));
    }

    #[test]
    fn test_failed_record_logs_details_and_error() {
        let mut record = finished(OperationStatus::Failed);
        record.error = Some("card processor unavailable".to_string());

        let output = capture(&record);

        assert!(output.contains("✗ payment"), "{output}");
        assert!(output.contains("charging"), "{output}");
        assert!(output.contains("Stall"), "{output}");
        assert!(output.contains("Step data"), "{output}");
        assert!(output.contains("step=reserve"), "{output}");
        let warn_line = output
            .lines()
            .find(|line| line.contains("Operation attempt ended with an error"))
            .expect("warn line");
        assert!(warn_line.contains("WARN"), "{warn_line}");
        assert!(warn_line.contains("card processor unavailable"), "{warn_line}");
    }
}
