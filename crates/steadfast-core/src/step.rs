// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step memoizer.
//!
//! A named step runs at most once per operation lifetime. If the journal
//! already holds a result for the name, that result is returned and the step
//! function is not called. This is what makes resuming safe for
//! non-idempotent side effects.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::OperationError;
use crate::retry::{self, RetryOptions};
use crate::types::StepDataEntry;

/// Storage for memoized step results.
pub trait StepJournal: Send + Sync {
    /// First stored result for `name`.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Append a result. Called only after a step succeeded.
    fn append(&self, name: &str, data: Value);
}

impl StepJournal for Mutex<Vec<StepDataEntry>> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.data.clone())
    }

    fn append(&self, name: &str, data: Value) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StepDataEntry {
                name: name.to_string(),
                data,
            });
    }
}

/// Result of [`execute_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct Memoized<T> {
    /// The step's value.
    pub value: T,
    /// True when the value came from the journal.
    pub replayed: bool,
}

/// Return the journaled result for `name`, or run `func` through the retry
/// executor and journal its result.
///
/// Failures are not journaled, so a failed step runs again on the next resume.
pub async fn execute_step<T, F, Fut>(
    journal: &dyn StepJournal,
    name: &str,
    func: F,
    options: &RetryOptions,
) -> Result<Memoized<T>, OperationError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OperationError>>,
{
    if let Some(data) = journal.lookup(name) {
        debug!(step = %name, "Step found in journal, skipping execution");
        let value = serde_json::from_value(data).map_err(|e| {
            OperationError::failed(anyhow::Error::new(e).context(format!(
                "stored result of step '{}' does not match the expected type",
                name
            )))
        })?;
        return Ok(Memoized {
            value,
            replayed: true,
        });
    }

    let value = retry::run(func, options).await?;
    let data = serde_json::to_value(&value).map_err(|e| {
        OperationError::failed(
            anyhow::Error::new(e).context(format!("result of step '{}' is not serializable", name)),
        )
    })?;
    journal.append(name, data);
    debug!(step = %name, "Step executed and journaled");

    Ok(Memoized {
        value,
        replayed: false,
    })
}
