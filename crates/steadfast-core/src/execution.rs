// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution engine: runs one attempt of an operation against its record.
//!
//! An attempt validates input, runs the operation logic in its own task,
//! checkpoints according to the effective save model, fires the response
//! callback exactly once and decides the terminal status.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, warn};

use crate::classify;
use crate::context::OperationContext;
use crate::definition::OperationDefinition;
use crate::engine::Lease;
use crate::error::{OperationError, StoreError};
use crate::retry::ContinuePredicate;
use crate::step::StepJournal;
use crate::store::OperationStore;
use crate::types::{
    LogEntry, OperationRecord, OperationResponse, OperationStatus, ResolveDirective, SaveModel,
    StepDataEntry,
};

/// Single-use response callback.
pub type Responder = Box<dyn FnOnce(OperationResponse) + Send>;

/// Holds the response callback until it is consumed.
///
/// The callback can be taken once; every later attempt to fire is a no-op.
pub(crate) struct ResponseGate {
    respond: Mutex<Option<Responder>>,
}

impl ResponseGate {
    pub(crate) fn new(respond: Responder) -> Self {
        Self {
            respond: Mutex::new(Some(respond)),
        }
    }

    /// Fire with `response`. Returns false if the gate was already consumed.
    pub(crate) fn fire(&self, response: OperationResponse) -> bool {
        let callback = self
            .respond
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(response);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.respond
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Live state shared between the engine and the context of one attempt.
pub(crate) struct AttemptState {
    id: String,
    input: Value,
    record: Mutex<OperationRecord>,
    gate: ResponseGate,
    resolve: ResolveDirective,
    persist_steps: bool,
    store: Arc<dyn OperationStore>,
    default_intervals: Vec<Duration>,
    can_continue: Option<ContinuePredicate>,
    /// Store revision seen when a save was rejected as a conflict.
    fenced_at: Mutex<Option<u64>>,
    _lease: Lease,
}

impl AttemptState {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn input(&self) -> &Value {
        &self.input
    }

    pub(crate) fn default_intervals(&self) -> &[Duration] {
        &self.default_intervals
    }

    pub(crate) fn can_continue(&self) -> Option<ContinuePredicate> {
        self.can_continue.clone()
    }

    fn record(&self) -> MutexGuard<'_, OperationRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once another writer has taken over the record.
    pub(crate) fn is_fenced(&self) -> bool {
        self.fenced_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn snapshot(&self) -> OperationRecord {
        self.record().clone()
    }

    pub(crate) fn log(&self, message: String) {
        self.record().log_entries.push(LogEntry {
            message,
            date_time: Utc::now(),
        });
    }

    /// Overwrite the output. Fires the response if the caller asked to be
    /// answered on output.
    pub(crate) fn set_output(&self, value: Value) {
        let response = {
            let mut record = self.record();
            record.output = Some(value);
            OperationResponse::from_record(&record)
        };
        if self.resolve == ResolveDirective::OnOutput && self.gate.fire(response) {
            debug!(operation_id = %self.id, "Response sent on output");
        }
    }

    /// Called after a step ran (not after a replay).
    pub(crate) async fn after_step(&self, name: &str) {
        if self.persist_steps {
            if let Err(e) = self.persist().await {
                warn!(
                    operation_id = %self.id,
                    step = %name,
                    error = %e,
                    "Failed to save operation after step"
                );
            }
        }

        if self.resolve.step_name() == Some(name) && self.respond_now() {
            debug!(operation_id = %self.id, step = %name, "Response sent after step");
        }
    }

    /// Fire the response with the current record state.
    pub(crate) fn respond_now(&self) -> bool {
        let response = OperationResponse::from_record(&self.record());
        self.gate.fire(response)
    }

    /// Save the current record with the next revision.
    ///
    /// After a revision conflict the attempt is fenced: it no longer owns the
    /// record and every later save fails without reaching the store.
    pub(crate) async fn persist(&self) -> Result<(), StoreError> {
        let snapshot = {
            let mut record = self.record();
            let fenced_at = *self
                .fenced_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(stored) = fenced_at {
                return Err(StoreError::Conflict {
                    id: record.id.clone(),
                    stored,
                    attempted: record.revision + 1,
                });
            }
            record.revision += 1;
            record.clone()
        };

        let result = self.store.save_operation(&snapshot).await;
        if let Err(StoreError::Conflict { stored, .. }) = &result {
            *self
                .fenced_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(*stored);
        }
        result
    }
}

impl StepJournal for AttemptState {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.record().step_data(name).cloned()
    }

    fn append(&self, name: &str, data: Value) {
        self.record().step_data_entries.push(StepDataEntry {
            name: name.to_string(),
            data,
        });
    }
}

/// Everything needed to run one attempt.
pub(crate) struct Attempt<S> {
    pub definition: Arc<OperationDefinition<S>>,
    pub record: OperationRecord,
    pub lease: Lease,
    pub services: Arc<S>,
    pub store: Arc<dyn OperationStore>,
    pub resolve: ResolveDirective,
    pub force_save: bool,
    pub default_intervals: Vec<Duration>,
    pub can_continue: Option<ContinuePredicate>,
    pub respond: Responder,
}

/// What an attempt produced.
pub(crate) struct AttemptOutcome {
    /// Record after finalization.
    pub record: OperationRecord,
    /// Result of the final save, if one was required.
    pub final_save: Option<Result<(), StoreError>>,
}

/// Run one attempt to its terminal status.
pub(crate) async fn execute<S>(attempt: Attempt<S>) -> AttemptOutcome
where
    S: Send + Sync + 'static,
{
    let Attempt {
        definition,
        mut record,
        lease,
        services,
        store,
        resolve,
        force_save,
        default_intervals,
        can_continue,
        respond,
    } = attempt;

    let policy = if force_save {
        SaveModel::Always
    } else {
        definition.save_model()
    };

    record.status = OperationStatus::Running;
    record.error = None;
    record.finished = None;

    let state = Arc::new(AttemptState {
        id: record.id.clone(),
        input: record.input.clone(),
        record: Mutex::new(record),
        gate: ResponseGate::new(respond),
        resolve,
        persist_steps: policy == SaveModel::Always,
        store,
        default_intervals,
        can_continue,
        fenced_at: Mutex::new(None),
        _lease: lease,
    });

    let started = Instant::now();

    if policy == SaveModel::Always {
        if let Err(e) = state.persist().await {
            warn!(operation_id = %state.id, error = %e, "Failed to save operation before running");
        }
    }

    let result = match definition.validate_input(state.input()) {
        Err(e) => Err(e),
        Ok(()) => {
            if state.resolve == ResolveDirective::Immediately && state.respond_now() {
                debug!(operation_id = %state.id, "Response sent after input validation");
            }
            run_operation(&definition, state.clone(), services).await
        }
    };

    let (status, error) = match &result {
        Ok(()) => (OperationStatus::Completed, None),
        Err(e) => (classify::classify(e), Some(classify::error_detail(e))),
    };

    {
        let mut record = state.record();
        record.status = status;
        record.error = error;
        record.finished = Some(Utc::now());
        record.duration_in_ms = record
            .duration_in_ms
            .saturating_add(started.elapsed().as_millis() as u64);
    }

    if !state.gate.has_fired() {
        state.respond_now();
    }

    let final_save = if policy.requires_final_save(status) {
        let saved = state.persist().await;
        if let Err(e) = &saved {
            error!(
                operation_id = %state.id,
                status = %status,
                error = %e,
                "Failed to save final operation state"
            );
        }
        Some(saved)
    } else {
        None
    };

    AttemptOutcome {
        record: state.snapshot(),
        final_save,
    }
}

/// Run the operation logic in its own task so a panic ends the attempt as a
/// failure instead of unwinding through the engine.
///
/// The task is aborted if the attempt is dropped before it finishes.
async fn run_operation<S>(
    definition: &OperationDefinition<S>,
    state: Arc<AttemptState>,
    services: Arc<S>,
) -> Result<(), OperationError>
where
    S: Send + Sync + 'static,
{
    let operation = definition.operation();
    let ctx = OperationContext::new(state, services);

    let task = AbortOnDropHandle::new(tokio::spawn(async move { operation.run(ctx).await }));
    match task.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => Err(OperationError::msg(format!(
            "operation panicked: {}",
            panic_message(join_err.into_panic())
        ))),
        Err(join_err) => Err(OperationError::msg(format!(
            "operation task was cancelled: {}",
            join_err
        ))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ActiveOperations;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Rejects every save as if another writer already stored revision 10.
    #[derive(Default)]
    struct TakenOverStore {
        saves: AtomicU32,
    }

    #[async_trait]
    impl OperationStore for TakenOverStore {
        async fn load_operation(&self, _id: &str) -> Result<Option<OperationRecord>, StoreError> {
            Ok(None)
        }

        async fn save_operation(&self, record: &OperationRecord) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict {
                id: record.id.clone(),
                stored: 10,
                attempted: record.revision,
            })
        }
    }

    fn lease(id: &str) -> Lease {
        Arc::new(ActiveOperations::default()).claim(id).unwrap()
    }

    fn collecting_responder() -> (Responder, Arc<Mutex<Vec<OperationResponse>>>) {
        let responses = Arc::new(Mutex::new(Vec::new()));
        let sink = responses.clone();
        let responder: Responder = Box::new(move |r| sink.lock().unwrap().push(r));
        (responder, responses)
    }

    fn attempt(
        definition: OperationDefinition<()>,
        record: OperationRecord,
        resolve: ResolveDirective,
        respond: Responder,
    ) -> Attempt<()> {
        Attempt {
            definition: Arc::new(definition),
            lease: lease(&record.id),
            record,
            services: Arc::new(()),
            store: Arc::new(MemoryStore::new()),
            resolve,
            force_save: false,
            default_intervals: Vec::new(),
            can_continue: None,
            respond,
        }
    }

    #[test]
    fn test_gate_fires_once() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let gate = ResponseGate::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let response = OperationResponse::from_record(&OperationRecord::new("op", "x", json!({})));

        assert!(!gate.has_fired());
        assert!(gate.fire(response.clone()));
        assert!(!gate.fire(response));
        assert!(gate.has_fired());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_attempt_responds_at_end() {
        let definition = OperationDefinition::from_fn("greet", |ctx: OperationContext<()>| async move {
            let name: String = ctx.step("name", || async { Ok("world".to_string()) }).await?;
            ctx.output(json!({ "greeting": format!("hello {}", name) }))?;
            Ok(())
        });
        let (respond, responses) = collecting_responder();

        let outcome = execute(attempt(
            definition,
            OperationRecord::new("op-1", "greet", json!({})),
            ResolveDirective::OnCompletion,
            respond,
        ))
        .await;

        assert_eq!(outcome.record.status, OperationStatus::Completed);
        assert!(outcome.record.finished.is_some());
        assert!(outcome.final_save.is_none());

        let responses = responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, OperationStatus::Completed);
        assert_eq!(responses[0].output, Some(json!({ "greeting": "hello world" })));
        assert_eq!(responses[0].last_completed_step.as_deref(), Some("name"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_still_responds() {
        let definition = OperationDefinition::from_fn("explode", |_ctx: OperationContext<()>| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        let (respond, responses) = collecting_responder();

        let outcome = execute(attempt(
            definition,
            OperationRecord::new("op-2", "explode", json!({})),
            ResolveDirective::OnCompletion,
            respond,
        ))
        .await;

        assert_eq!(outcome.record.status, OperationStatus::Failed);
        assert!(outcome.record.error.as_deref().unwrap().contains("kaboom"));
        assert_eq!(responses.lock().unwrap().len(), 1);
        // Default save model persists failures.
        assert!(matches!(outcome.final_save, Some(Ok(()))));
    }

    #[tokio::test]
    async fn test_resume_clears_previous_error() {
        let definition =
            OperationDefinition::from_fn("noop", |_ctx: OperationContext<()>| async move { Ok(()) });
        let mut record = OperationRecord::new("op-3", "noop", json!({}));
        record.status = OperationStatus::Failed;
        record.error = Some("previous failure".to_string());
        let (respond, _responses) = collecting_responder();

        let outcome = execute(attempt(
            definition,
            record,
            ResolveDirective::OnCompletion,
            respond,
        ))
        .await;

        assert_eq!(outcome.record.status, OperationStatus::Completed);
        assert_eq!(outcome.record.error, None);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_fenced_attempt_keeps_the_observed_revision() {
        let store = Arc::new(TakenOverStore::default());
        let state = AttemptState {
            id: "op-1".to_string(),
            input: json!({}),
            record: Mutex::new(OperationRecord::new("op-1", "x", json!({}))),
            gate: ResponseGate::new(Box::new(|_| {})),
            resolve: ResolveDirective::OnCompletion,
            persist_steps: true,
            store: store.clone(),
            default_intervals: Vec::new(),
            can_continue: None,
            fenced_at: Mutex::new(None),
            _lease: lease("op-1"),
        };

        assert!(!state.is_fenced());
        let first = state.persist().await.unwrap_err();
        assert!(matches!(first, StoreError::Conflict { stored: 10, attempted: 1, .. }));
        assert!(state.is_fenced());

        let second = state.persist().await.unwrap_err();
        assert!(matches!(second, StoreError::Conflict { stored: 10, attempted: 2, .. }));
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }
}
