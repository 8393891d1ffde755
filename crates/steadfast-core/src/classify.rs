// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error classifier: maps an operation error to its terminal status and
//! decides how much detail is stored and shown.

use crate::error::{ErrorKind, OperationError};
use crate::types::OperationStatus;

/// Client-facing text for failed operations.
pub const EXECUTION_ERROR_TEXT: &str = "Operation Execution Error.";

/// Client-facing text for interrupted operations.
pub const INTERRUPTED_TEXT: &str = "Operation Interrupted.";

/// Terminal status for an attempt that ended with `err`.
pub fn classify(err: &OperationError) -> OperationStatus {
    match err.kind() {
        ErrorKind::Interrupted => OperationStatus::Interrupted,
        ErrorKind::MalformedInput | ErrorKind::Rejected => OperationStatus::Rejected,
        ErrorKind::Failed => OperationStatus::Failed,
    }
}

/// Error detail stored on the record.
///
/// Client-facing errors keep their message. Failures keep the full cause
/// chain for diagnostics.
pub fn error_detail(err: &OperationError) -> String {
    match err {
        OperationError::Failed(inner) => format!("{:?}", inner),
        other => other.to_string(),
    }
}

/// Error text safe to surface to untrusted clients.
pub fn client_error_text(status: OperationStatus, error: Option<&str>) -> Option<String> {
    match status {
        OperationStatus::Failed => Some(EXECUTION_ERROR_TEXT.to_string()),
        OperationStatus::Interrupted => Some(INTERRUPTED_TEXT.to_string()),
        _ => error.map(str::to_string),
    }
}
