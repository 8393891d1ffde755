// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for steadfast-core.
//!
//! Three families are kept apart on purpose:
//!
//! - [`OperationError`]: raised while operation logic runs. It is a small closed
//!   set of tagged kinds so the classifier can turn it into a status with a plain
//!   `match`.
//! - [`StoreError`]: raised by an [`OperationStore`](crate::store::OperationStore)
//!   implementation.
//! - [`EngineError`]: returned by the engine facade. Storage faults are wrapped
//!   here and never change an operation's status.

use thiserror::Error;

/// Result type for operation logic.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Result type for engine facade calls.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The closed set of error kinds an operation attempt can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Cooperative shutdown stopped processing.
    Interrupted,
    /// The input was refused by the definition's validator.
    MalformedInput,
    /// Operation logic refused the request (business rejection).
    Rejected,
    /// Anything else.
    Failed,
}

/// An error raised while an operation is running.
#[derive(Debug, Error)]
pub enum OperationError {
    /// Processing was stopped because `can_continue_processing` returned false.
    #[error("operation interrupted: processing cannot continue")]
    Interrupted,

    /// The input payload failed validation.
    #[error("MALFORMED_INPUT {0}")]
    MalformedInput(String),

    /// The operation explicitly refused the request.
    #[error("{code} {message}")]
    Rejected {
        /// Caller-defined rejection code, e.g. `INSUFFICIENT_FUNDS`.
        code: String,
        /// Client-facing reason.
        message: String,
    },

    /// An unexpected failure in step or operation logic.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl OperationError {
    /// Build a business rejection.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap any error as an unexpected failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Failed(err.into())
    }

    /// Build an unexpected failure from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::msg(message))
    }

    /// The tag used by the classifier.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Interrupted => ErrorKind::Interrupted,
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Failed(_) => ErrorKind::Failed,
        }
    }

    /// True for the cancellation error.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Attempt to view a failure's underlying error as `E`.
    ///
    /// Handy inside `transient_when` predicates.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Errors raised by an operation store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store produced something that is not a valid operation record.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Optimistic revision check failed.
    #[error("revision conflict for operation '{id}': stored revision {stored}, attempted {attempted}")]
    Conflict {
        /// Operation id.
        id: String,
        /// Revision currently held by the store.
        stored: u64,
        /// Revision carried by the rejected save.
        attempted: u64,
    },

    /// Any other store failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors returned by the engine facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No definition is registered under this name.
    #[error("Operation name '{0}' was not recognised.")]
    UnknownOperation(String),

    /// A caller-supplied id is already in use.
    #[error("Operation with id '{0}' already exists.")]
    OperationAlreadyExists(String),

    /// No record exists for this id.
    #[error("Operation '{0}' was not found.")]
    OperationNotFound(String),

    /// A stored record refers to a definition that is not registered.
    #[error("Operation '{id}' uses unknown operation definition '{operation_name}'.")]
    UnknownDefinition {
        /// Operation id.
        id: String,
        /// Name stored in the record.
        operation_name: String,
    },

    /// Another attempt for this id is executing in this process.
    #[error("Operation '{0}' is already being processed.")]
    OperationBusy(String),

    /// The load collaborator raised an error.
    #[error("Unable to load operation from store: {0}")]
    LoadFailed(#[source] StoreError),

    /// The load collaborator returned something unusable.
    #[error("The store returned an invalid response: {0}")]
    LoadInvalidResponse(String),

    /// The final save of an attempt failed.
    #[error("Unable to save operation: {0}")]
    SaveFailed(#[source] StoreError),

    /// Two definitions were registered under the same name.
    #[error("Operation definition '{0}' is registered more than once.")]
    DuplicateDefinition(String),

    /// The engine was built without a required part.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfiguration(String),
}

impl EngineError {
    /// Stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownOperation(_) => "UNKNOWN_OPERATION",
            Self::OperationAlreadyExists(_) => "OPERATION_ALREADY_EXISTS",
            Self::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            Self::UnknownDefinition { .. } => "UNKNOWN_DEFINITION",
            Self::OperationBusy(_) => "OPERATION_BUSY",
            Self::LoadFailed(_) => "LOAD_FAILED",
            Self::LoadInvalidResponse(_) => "LOAD_INVALID_RESPONSE",
            Self::SaveFailed(_) => "SAVE_FAILED",
            Self::DuplicateDefinition(_) => "DUPLICATE_DEFINITION",
            Self::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
        }
    }

    /// True when the caller made an invalid request, false for engine or storage faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation(_)
                | Self::OperationAlreadyExists(_)
                | Self::OperationNotFound(_)
                | Self::UnknownDefinition { .. }
                | Self::OperationBusy(_)
        )
    }

    /// True when the error came from the storage collaborator.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed(_) | Self::LoadInvalidResponse(_) | Self::SaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("gateway timeout")]
    struct GatewayTimeout;

    #[test]
    fn test_operation_error_display() {
        assert_eq!(
            OperationError::rejected("INSUFFICIENT_FUNDS", "Balance too low.").to_string(),
            "INSUFFICIENT_FUNDS Balance too low."
        );
        assert_eq!(
            OperationError::MalformedInput("amount is required".to_string()).to_string(),
            "MALFORMED_INPUT amount is required"
        );
        assert_eq!(OperationError::msg("boom").to_string(), "boom");
    }

    #[test]
    fn test_operation_error_kinds() {
        assert_eq!(OperationError::Interrupted.kind(), ErrorKind::Interrupted);
        assert_eq!(
            OperationError::MalformedInput("x".into()).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(OperationError::rejected("A", "b").kind(), ErrorKind::Rejected);
        assert_eq!(OperationError::failed(GatewayTimeout).kind(), ErrorKind::Failed);
        assert!(OperationError::Interrupted.is_interrupted());
    }

    #[test]
    fn test_downcast_failed_error() {
        let err = OperationError::failed(GatewayTimeout);
        assert!(err.downcast_ref::<GatewayTimeout>().is_some());
        assert!(
            OperationError::rejected("A", "b")
                .downcast_ref::<GatewayTimeout>()
                .is_none()
        );
    }

    #[test]
    fn test_engine_error_codes() {
        let test_cases = vec![
            (
                EngineError::UnknownOperation("x".into()),
                "UNKNOWN_OPERATION",
                true,
            ),
            (
                EngineError::OperationAlreadyExists("x".into()),
                "OPERATION_ALREADY_EXISTS",
                true,
            ),
            (
                EngineError::OperationNotFound("x".into()),
                "OPERATION_NOT_FOUND",
                true,
            ),
            (
                EngineError::OperationBusy("x".into()),
                "OPERATION_BUSY",
                true,
            ),
            (
                EngineError::LoadFailed(StoreError::Unavailable("down".into())),
                "LOAD_FAILED",
                false,
            ),
            (
                EngineError::LoadInvalidResponse("bad".into()),
                "LOAD_INVALID_RESPONSE",
                false,
            ),
            (
                EngineError::SaveFailed(StoreError::Unavailable("down".into())),
                "SAVE_FAILED",
                false,
            ),
        ];

        for (error, expected_code, client) in test_cases {
            assert_eq!(error.error_code(), expected_code, "{:?}", error);
            assert_eq!(error.is_client_error(), client, "{:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::UnknownDefinition {
            id: "op-1".into(),
            operation_name: "refund".into(),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'op-1' uses unknown operation definition 'refund'."
        );

        let err = EngineError::LoadFailed(StoreError::Unavailable("connection refused".into()));
        assert_eq!(
            err.to_string(),
            "Unable to load operation from store: store unavailable: connection refused"
        );
        assert!(err.is_store_error());
    }

    #[test]
    fn test_store_conflict_display() {
        let err = StoreError::Conflict {
            id: "op-1".into(),
            stored: 4,
            attempted: 4,
        };
        assert_eq!(
            err.to_string(),
            "revision conflict for operation 'op-1': stored revision 4, attempted 4"
        );
    }
}
