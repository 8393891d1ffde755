// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry executor: runs one unit of work with an explicit backoff schedule and
//! cooperative cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::OperationError;

/// Decides whether a failure is worth retrying.
pub type TransientPredicate = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

/// Polled before every attempt and before every retry wait.
pub type ContinuePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Options for [`run`].
#[derive(Clone, Default)]
pub struct RetryOptions {
    /// Waits between attempts, consumed in order. One retry per entry.
    pub intervals: Vec<Duration>,
    /// Defaults to "nothing is transient".
    pub is_error_transient: Option<TransientPredicate>,
    /// Defaults to "always continue".
    pub can_continue_processing: Option<ContinuePredicate>,
}

impl RetryOptions {
    /// Options with the given schedule and no predicates.
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self {
            intervals,
            ..Self::default()
        }
    }

    /// Set the transient predicate.
    pub fn with_transient<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&OperationError) -> bool + Send + Sync + 'static,
    {
        self.is_error_transient = Some(Arc::new(predicate));
        self
    }

    /// Set the cancellation predicate.
    pub fn with_can_continue<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.can_continue_processing = Some(Arc::new(predicate));
        self
    }

    fn can_continue(&self) -> bool {
        self.can_continue_processing
            .as_ref()
            .is_none_or(|predicate| predicate())
    }

    fn is_transient(&self, err: &OperationError) -> bool {
        if err.is_interrupted() {
            return false;
        }
        self.is_error_transient
            .as_ref()
            .is_some_and(|predicate| predicate(err))
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("intervals", &self.intervals)
            .field("is_error_transient", &self.is_error_transient.is_some())
            .field(
                "can_continue_processing",
                &self.can_continue_processing.is_some(),
            )
            .finish()
    }
}

/// Run `func` until it succeeds, fails with a non-transient error, or the
/// schedule runs out.
///
/// Errors propagate unchanged. If the cancellation predicate answers false
/// before an attempt or before a wait, [`OperationError::Interrupted`] is
/// returned without calling `func` again.
pub async fn run<T, F, Fut>(mut func: F, options: &RetryOptions) -> Result<T, OperationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    let mut remaining = options.intervals.iter();
    let mut attempt: u32 = 1;

    loop {
        if !options.can_continue() {
            return Err(OperationError::Interrupted);
        }

        let err = match func().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !options.is_transient(&err) {
            return Err(err);
        }

        let Some(delay) = remaining.next() else {
            return Err(err);
        };

        warn!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );

        if !options.can_continue() {
            return Err(OperationError::Interrupted);
        }

        tokio::time::sleep(*delay).await;
        attempt += 1;
    }
}
