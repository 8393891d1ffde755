// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared types: the operation record, its status machine, save models,
//! resolve directives and the response handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Wire token for [`ResolveDirective::Immediately`].
pub const RESOLVE_IMMEDIATELY: &str = "^";

/// Wire token for [`ResolveDirective::OnOutput`].
pub const RESOLVE_ON_OUTPUT: &str = "?";

/// Token used when no step has completed yet.
pub const NO_STEP_COMPLETED: &str = "^";

// ============================================================================
// Operation status
// ============================================================================

/// Status of an operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// An attempt is in progress, or was cut short without finalizing.
    Running,
    /// Operation logic returned successfully.
    Completed,
    /// Unexpected failure.
    Failed,
    /// Malformed input or a business rejection.
    Rejected,
    /// Cooperative shutdown stopped the attempt.
    Interrupted,
}

/// Externally visible category of a status.
///
/// Transport bindings map these to protocol codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    /// The operation completed.
    Success,
    /// Still running, only observable through an early resolve.
    InFlight,
    /// The caller caused the failure.
    ClientError,
    /// The engine or operation logic failed.
    InternalError,
    /// Processing stopped because of shutdown.
    ShuttingDown,
}

impl OperationStatus {
    /// Lowercase name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Interrupted => "interrupted",
        }
    }

    /// True for every status an attempt can finish with.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// True when the record may be handed to `resume_operation`.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted | Self::Failed)
    }

    /// Externally visible category.
    pub fn category(&self) -> StatusCategory {
        match self {
            Self::Completed => StatusCategory::Success,
            Self::Running => StatusCategory::InFlight,
            Self::Rejected => StatusCategory::ClientError,
            Self::Failed => StatusCategory::InternalError,
            Self::Interrupted => StatusCategory::ShuttingDown,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(format!("unknown operation status: {}", other)),
        }
    }
}

// ============================================================================
// Save model
// ============================================================================

/// Checkpoint policy of an operation definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveModel {
    /// Never persist, except when interrupted.
    Never,
    /// Persist the final state when the attempt failed.
    Error,
    /// Persist the final state when the attempt failed or was rejected.
    #[default]
    Rejection,
    /// Persist before running, after every step and at the end.
    Always,
}

impl SaveModel {
    /// Whether an attempt ending in `status` must be saved under this policy.
    ///
    /// Interrupted attempts are saved regardless of policy so they stay resumable.
    pub fn requires_final_save(&self, status: OperationStatus) -> bool {
        if status == OperationStatus::Interrupted {
            return true;
        }
        match self {
            Self::Always => true,
            Self::Error => status == OperationStatus::Failed,
            Self::Rejection => {
                matches!(status, OperationStatus::Failed | OperationStatus::Rejected)
            }
            Self::Never => false,
        }
    }
}

impl FromStr for SaveModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "error" => Ok(Self::Error),
            "rejection" => Ok(Self::Rejection),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown save model: {}", other)),
        }
    }
}

// ============================================================================
// Resolve directive
// ============================================================================

/// When the response callback should fire relative to operation progress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ResolveDirective {
    /// Right after input validation passes.
    Immediately,
    /// As soon as operation logic sets its output.
    OnOutput,
    /// Once the named step completes during this attempt.
    AfterStep(String),
    /// Only at the end of the attempt.
    #[default]
    OnCompletion,
}

impl ResolveDirective {
    /// Parse a wire token. Absent or empty means on completion.
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            None | Some("") => Self::OnCompletion,
            Some(RESOLVE_IMMEDIATELY) => Self::Immediately,
            Some(RESOLVE_ON_OUTPUT) => Self::OnOutput,
            Some(step) => Self::AfterStep(step.to_string()),
        }
    }

    /// The step name this directive waits for, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::AfterStep(name) => Some(name),
            _ => None,
        }
    }
}

impl From<&str> for ResolveDirective {
    fn from(token: &str) -> Self {
        Self::from_token(Some(token))
    }
}

// ============================================================================
// Operation record
// ============================================================================

/// One message appended through the operation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Log text.
    pub message: String,
    /// When it was logged.
    pub date_time: DateTime<Utc>,
}

/// One memoized step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDataEntry {
    /// Step name, unique within one operation.
    pub name: String,
    /// Stored result.
    pub data: Value,
}

/// Durable state of one operation instance.
///
/// This is the checkpoint a resumed attempt starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Globally unique id.
    pub id: String,
    /// Name of the definition that runs this record.
    pub operation_name: String,
    /// Input payload, set once at creation.
    pub input: Value,
    /// Output payload, if logic has set one.
    #[serde(default)]
    pub output: Option<Value>,
    /// When the record was created.
    pub started: DateTime<Utc>,
    /// When the latest attempt finished; `None` while running.
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    /// Append-only log.
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,
    /// Append-only memoization table.
    #[serde(default)]
    pub step_data_entries: Vec<StepDataEntry>,
    /// Current status.
    pub status: OperationStatus,
    /// Busy time accumulated across every attempt.
    #[serde(default)]
    pub duration_in_ms: u64,
    /// Error detail of the latest non-successful attempt.
    #[serde(default)]
    pub error: Option<String>,
    /// Incremented before every save, used for optimistic conflict detection.
    #[serde(default)]
    pub revision: u64,
}

impl OperationRecord {
    /// A fresh record in the running state.
    pub fn new(id: impl Into<String>, operation_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            operation_name: operation_name.into(),
            input,
            output: None,
            started: Utc::now(),
            finished: None,
            log_entries: Vec::new(),
            step_data_entries: Vec::new(),
            status: OperationStatus::Running,
            duration_in_ms: 0,
            error: None,
            revision: 0,
        }
    }

    /// First stored result for `name`.
    pub fn step_data(&self, name: &str) -> Option<&Value> {
        self.step_data_entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.data)
    }

    /// Name of the most recently completed step.
    pub fn last_completed_step(&self) -> Option<&str> {
        self.step_data_entries.last().map(|entry| entry.name.as_str())
    }
}

// ============================================================================
// Response
// ============================================================================

/// What the response callback receives, once per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    /// Operation id.
    pub operation_id: String,
    /// Status at the moment the response fired.
    pub status: OperationStatus,
    /// Stored error detail, if any.
    pub error: Option<String>,
    /// Output at the moment the response fired.
    pub output: Option<Value>,
    /// Last completed step; `None` when no step has completed.
    pub last_completed_step: Option<String>,
}

impl OperationResponse {
    /// Snapshot a record.
    pub fn from_record(record: &OperationRecord) -> Self {
        Self {
            operation_id: record.id.clone(),
            status: record.status,
            error: record.error.clone(),
            output: record.output.clone(),
            last_completed_step: record.last_completed_step().map(str::to_string),
        }
    }

    /// Last completed step as a string, `"^"` when none.
    pub fn last_completed_step_token(&self) -> &str {
        self.last_completed_step
            .as_deref()
            .unwrap_or(NO_STEP_COMPLETED)
    }

    /// Error text safe to show to untrusted clients.
    pub fn client_error(&self) -> Option<String> {
        crate::classify::client_error_text(self.status, self.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [
            OperationStatus::Running,
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Rejected,
            OperationStatus::Interrupted,
        ] {
            assert_eq!(status.to_string().parse::<OperationStatus>(), Ok(status));
        }
        assert!("paused".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_status_categories() {
        assert_eq!(OperationStatus::Completed.category(), StatusCategory::Success);
        assert_eq!(OperationStatus::Running.category(), StatusCategory::InFlight);
        assert_eq!(OperationStatus::Rejected.category(), StatusCategory::ClientError);
        assert_eq!(OperationStatus::Failed.category(), StatusCategory::InternalError);
        assert_eq!(
            OperationStatus::Interrupted.category(),
            StatusCategory::ShuttingDown
        );
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(OperationStatus::Running.is_resumable());
        assert!(OperationStatus::Interrupted.is_resumable());
        assert!(OperationStatus::Failed.is_resumable());
        assert!(!OperationStatus::Completed.is_resumable());
        assert!(!OperationStatus::Rejected.is_resumable());
        assert!(!OperationStatus::Running.is_terminal());
    }

    #[test]
    fn test_save_model_final_save_table() {
        use OperationStatus::*;

        let cases = [
            (SaveModel::Always, Completed, true),
            (SaveModel::Always, Rejected, true),
            (SaveModel::Error, Completed, false),
            (SaveModel::Error, Rejected, false),
            (SaveModel::Error, Failed, true),
            (SaveModel::Rejection, Completed, false),
            (SaveModel::Rejection, Rejected, true),
            (SaveModel::Rejection, Failed, true),
            (SaveModel::Never, Failed, false),
            (SaveModel::Never, Interrupted, true),
            (SaveModel::Error, Interrupted, true),
        ];

        for (model, status, expected) in cases {
            assert_eq!(
                model.requires_final_save(status),
                expected,
                "{:?} / {:?}",
                model,
                status
            );
        }
    }

    #[test]
    fn test_save_model_default_and_parse() {
        assert_eq!(SaveModel::default(), SaveModel::Rejection);
        assert_eq!("always".parse::<SaveModel>(), Ok(SaveModel::Always));
        assert!("sometimes".parse::<SaveModel>().is_err());
    }

    #[test]
    fn test_resolve_directive_tokens() {
        assert_eq!(ResolveDirective::from_token(None), ResolveDirective::OnCompletion);
        assert_eq!(
            ResolveDirective::from_token(Some("")),
            ResolveDirective::OnCompletion
        );
        assert_eq!(ResolveDirective::from("^"), ResolveDirective::Immediately);
        assert_eq!(ResolveDirective::from("?"), ResolveDirective::OnOutput);
        assert_eq!(
            ResolveDirective::from("charge-card"),
            ResolveDirective::AfterStep("charge-card".to_string())
        );
        assert_eq!(
            ResolveDirective::from("charge-card").step_name(),
            Some("charge-card")
        );
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut record = OperationRecord::new("op-1", "payment", json!({"amount": 10}));
        record.step_data_entries.push(StepDataEntry {
            name: "charge".to_string(),
            data: json!("ch_123"),
        });

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["operationName"], "payment");
        assert_eq!(value["status"], "running");
        assert_eq!(value["durationInMs"], 0);
        assert_eq!(value["stepDataEntries"][0]["name"], "charge");
        assert!(value["finished"].is_null());

        let back: OperationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_step_lookup_uses_first_match() {
        let mut record = OperationRecord::new("op-1", "payment", Value::Null);
        record.step_data_entries.push(StepDataEntry {
            name: "a".into(),
            data: json!(1),
        });
        record.step_data_entries.push(StepDataEntry {
            name: "a".into(),
            data: json!(2),
        });

        assert_eq!(record.step_data("a"), Some(&json!(1)));
        assert_eq!(record.last_completed_step(), Some("a"));
        assert_eq!(record.step_data("b"), None);
    }

    #[test]
    fn test_response_sentinel_for_no_steps() {
        let record = OperationRecord::new("op-1", "payment", Value::Null);
        let response = OperationResponse::from_record(&record);
        assert_eq!(response.last_completed_step, None);
        assert_eq!(response.last_completed_step_token(), "^");
    }
}
