// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The capability handle operation logic runs against.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::{OperationError, OperationResult};
use crate::execution::AttemptState;
use crate::retry::{RetryOptions, TransientPredicate};
use crate::step;

/// Per-step overrides for [`OperationContext::step_with`].
#[derive(Clone)]
pub struct StepOptions {
    name: String,
    retry_intervals: Option<Vec<Duration>>,
    transient_when: Option<TransientPredicate>,
}

impl StepOptions {
    /// Options for the step `name` with engine defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry_intervals: None,
            transient_when: None,
        }
    }

    /// Use this retry schedule instead of the engine default.
    pub fn retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.retry_intervals = Some(intervals);
        self
    }

    /// Retry failures accepted by `predicate`. Without one, nothing is retried.
    pub fn transient_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&OperationError) -> bool + Send + Sync + 'static,
    {
        self.transient_when = Some(Arc::new(predicate));
        self
    }

    /// The step name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle given to operation logic for one attempt.
///
/// Cloning is cheap; every clone refers to the same live record.
pub struct OperationContext<S> {
    state: Arc<AttemptState>,
    services: Arc<S>,
}

impl<S> Clone for OperationContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            services: self.services.clone(),
        }
    }
}

impl<S> OperationContext<S> {
    pub(crate) fn new(state: Arc<AttemptState>, services: Arc<S>) -> Self {
        Self { state, services }
    }

    /// The raw input payload.
    pub fn input(&self) -> &Value {
        self.state.input()
    }

    /// The input decoded as `T`.
    ///
    /// A decode failure is a malformed-input error, so the attempt ends rejected.
    pub fn input_as<T: DeserializeOwned>(&self) -> OperationResult<T> {
        serde_json::from_value(self.state.input().clone())
            .map_err(|e| OperationError::MalformedInput(e.to_string()))
    }

    /// Id of the operation record.
    pub fn request_id(&self) -> &str {
        self.state.id()
    }

    /// Host-supplied services.
    pub fn services(&self) -> &S {
        &self.services
    }

    /// Append a message to the record's log.
    pub fn log(&self, message: impl Into<String>) {
        self.state.log(message.into());
    }

    /// Sleep without touching the record.
    pub async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Run a memoized step with the engine's default retry schedule.
    pub async fn step<T, F, Fut>(&self, name: &str, func: F) -> OperationResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = OperationResult<T>>,
    {
        self.step_with(StepOptions::new(name), func).await
    }

    /// Run a memoized step with per-step retry overrides.
    ///
    /// A step whose name is already journaled returns the stored value and
    /// `func` is not called. Once another writer has taken over the record,
    /// no further step runs and the attempt ends interrupted.
    pub async fn step_with<T, F, Fut>(&self, options: StepOptions, func: F) -> OperationResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = OperationResult<T>>,
    {
        let StepOptions {
            name,
            retry_intervals,
            transient_when,
        } = options;

        if self.state.is_fenced() {
            warn!(
                operation_id = %self.state.id(),
                step = %name,
                "Record taken over by another writer, not running step"
            );
            return Err(OperationError::Interrupted);
        }

        let retry = RetryOptions {
            intervals: retry_intervals.unwrap_or_else(|| self.state.default_intervals().to_vec()),
            is_error_transient: transient_when,
            can_continue_processing: self.state.can_continue(),
        };

        let memo = step::execute_step(self.state.as_ref(), &name, func, &retry).await?;
        if !memo.replayed {
            self.state.after_step(&name).await;
        }
        Ok(memo.value)
    }

    /// Set the operation output. Later calls overwrite earlier ones.
    pub fn output<T: Serialize>(&self, value: T) -> OperationResult<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            OperationError::failed(anyhow::Error::new(e).context("output is not serializable"))
        })?;
        self.state.set_output(value);
        Ok(())
    }
}

impl<S> std::fmt::Debug for OperationContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("request_id", &self.request_id())
            .finish_non_exhaustive()
    }
}
