// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine facade: the public start/resume/get entry points.
//!
//! The facade owns the definition registry, wires the store and services
//! into each attempt, keeps an in-process lease per operation id and turns
//! store faults into [`EngineError`]s so they never change an operation's
//! status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::definition::{OperationDefinition, OperationRegistry};
use crate::error::{EngineError, Result, StoreError};
use crate::execution::{self, Attempt, Responder};
use crate::report;
use crate::retry::ContinuePredicate;
use crate::store::OperationStore;
use crate::types::{OperationRecord, OperationResponse, ResolveDirective};

/// Request to start a new operation.
#[derive(Debug, Clone)]
pub struct StartOperation {
    /// Registered definition name.
    pub operation_name: String,
    /// Input payload.
    pub input: Value,
    /// Caller-chosen id. Supplying one forces durable saving.
    pub operation_id: Option<String>,
    /// When to respond.
    pub resolve: ResolveDirective,
}

impl StartOperation {
    /// Start `operation_name` with `input`, an engine-generated id and a
    /// response on completion.
    pub fn new(operation_name: impl Into<String>, input: Value) -> Self {
        Self {
            operation_name: operation_name.into(),
            input,
            operation_id: None,
            resolve: ResolveDirective::OnCompletion,
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Set the resolve directive.
    pub fn resolve(mut self, resolve: impl Into<ResolveDirective>) -> Self {
        self.resolve = resolve.into();
        self
    }
}

/// Request to resume a stored operation.
#[derive(Debug, Clone)]
pub struct ResumeOperation {
    /// Id of the stored record.
    pub operation_id: String,
    /// When to respond.
    pub resolve: ResolveDirective,
}

impl ResumeOperation {
    /// Resume `operation_id`, responding on completion.
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            resolve: ResolveDirective::OnCompletion,
        }
    }

    /// Set the resolve directive.
    pub fn resolve(mut self, resolve: impl Into<ResolveDirective>) -> Self {
        self.resolve = resolve.into();
        self
    }
}

/// Ids currently executing in this process.
#[derive(Debug, Default)]
pub(crate) struct ActiveOperations {
    ids: Mutex<HashSet<String>>,
}

impl ActiveOperations {
    pub(crate) fn claim(self: &Arc<Self>, id: &str) -> Option<Lease> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(Lease {
            active: self.clone(),
            id: id.to_string(),
        })
    }

    fn contains(&self, id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }
}

/// Exclusive claim on an operation id, released on drop.
///
/// The attempt owns its lease, so the id stays held until the operation
/// logic itself has been dropped, even when the caller gave up waiting.
#[derive(Debug)]
pub(crate) struct Lease {
    active: Arc<ActiveOperations>,
    id: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Builder for creating an [`Engine`].
pub struct EngineBuilder<S> {
    definitions: Vec<OperationDefinition<S>>,
    store: Option<Arc<dyn OperationStore>>,
    services: Option<Arc<S>>,
    config: EngineConfig,
    can_continue: Option<ContinuePredicate>,
}

impl<S> std::fmt::Debug for EngineBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("definitions", &self.definitions)
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("services", &self.services.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .field("can_continue", &self.can_continue.is_some())
            .finish()
    }
}

impl<S> Default for EngineBuilder<S> {
    fn default() -> Self {
        Self {
            definitions: Vec::new(),
            store: None,
            services: None,
            config: EngineConfig::default(),
            can_continue: None,
        }
    }
}

impl<S> EngineBuilder<S>
where
    S: Send + Sync + 'static,
{
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation definition.
    pub fn operation(mut self, definition: OperationDefinition<S>) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the services handed to every operation (required).
    pub fn services(mut self, services: S) -> Self {
        self.services = Some(Arc::new(services));
        self
    }

    /// Set services that are already shared.
    pub fn shared_services(mut self, services: Arc<S>) -> Self {
        self.services = Some(services);
        self
    }

    /// Set the configuration.
    ///
    /// Default: [`EngineConfig::default`]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop processing when `predicate` returns false.
    pub fn can_continue_processing<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.can_continue = Some(Arc::new(predicate));
        self
    }

    /// Stop processing once `token` is cancelled.
    pub fn cancellation_token(self, token: CancellationToken) -> Self {
        self.can_continue_processing(move || !token.is_cancelled())
    }

    /// Build the engine.
    ///
    /// Returns an error if the store or services are missing, or if two
    /// definitions share a name.
    pub fn build(self) -> Result<Engine<S>> {
        let store = self.store.ok_or_else(|| {
            EngineError::InvalidConfiguration("an operation store is required".to_string())
        })?;
        let services = self.services.ok_or_else(|| {
            EngineError::InvalidConfiguration("services are required".to_string())
        })?;
        let registry = OperationRegistry::from_definitions(self.definitions)?;

        debug!(operations = ?registry.names(), "Engine built");

        Ok(Engine {
            registry,
            store,
            services,
            config: self.config,
            can_continue: self.can_continue,
            active: Arc::new(ActiveOperations::default()),
        })
    }
}

/// Runs operations with step memoization, retries and checkpointing.
pub struct Engine<S> {
    registry: OperationRegistry<S>,
    store: Arc<dyn OperationStore>,
    services: Arc<S>,
    config: EngineConfig,
    can_continue: Option<ContinuePredicate>,
    active: Arc<ActiveOperations>,
}

impl<S> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("operations", &self.registry.names())
            .field("store", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl<S> Engine<S>
where
    S: Send + Sync + 'static,
{
    /// Create a new builder for configuring the engine.
    pub fn builder() -> EngineBuilder<S> {
        EngineBuilder::new()
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// True while an attempt for `operation_id` runs in this process.
    pub fn is_processing(&self, operation_id: &str) -> bool {
        self.active.contains(operation_id)
    }

    /// Start a new operation.
    ///
    /// `respond` fires exactly once, at the point the resolve directive
    /// asks for. The returned record is the state after the attempt.
    /// Requests refused before execution return `Err` and never call
    /// `respond`.
    #[instrument(
        skip(self, request, respond),
        fields(operation = %request.operation_name, operation_id = tracing::field::Empty)
    )]
    pub async fn start_operation<R>(
        &self,
        request: StartOperation,
        respond: R,
    ) -> Result<OperationRecord>
    where
        R: FnOnce(OperationResponse) + Send + 'static,
    {
        let definition = self
            .registry
            .get(&request.operation_name)
            .ok_or_else(|| EngineError::UnknownOperation(request.operation_name.clone()))?;

        let force_save = request.operation_id.is_some();
        let id = request
            .operation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Span::current().record("operation_id", id.as_str());

        let lease = self
            .active
            .claim(&id)
            .ok_or_else(|| EngineError::OperationBusy(id.clone()))?;

        if force_save && self.load(&id).await?.is_some() {
            return Err(EngineError::OperationAlreadyExists(id));
        }

        info!(resolve = ?request.resolve, "Starting operation");

        let record = OperationRecord::new(id, definition.name(), request.input);
        self.run_attempt(
            definition,
            record,
            lease,
            request.resolve,
            force_save,
            Box::new(respond),
        )
        .await
    }

    /// Resume a stored operation from its last completed step.
    ///
    /// Resumed attempts are always checkpointed.
    #[instrument(skip(self, request, respond), fields(operation_id = %request.operation_id))]
    pub async fn resume_operation<R>(
        &self,
        request: ResumeOperation,
        respond: R,
    ) -> Result<OperationRecord>
    where
        R: FnOnce(OperationResponse) + Send + 'static,
    {
        let id = request.operation_id;

        let lease = self
            .active
            .claim(&id)
            .ok_or_else(|| EngineError::OperationBusy(id.clone()))?;

        let record = self
            .load(&id)
            .await?
            .ok_or_else(|| EngineError::OperationNotFound(id.clone()))?;

        let definition = self.registry.get(&record.operation_name).ok_or_else(|| {
            EngineError::UnknownDefinition {
                id: id.clone(),
                operation_name: record.operation_name.clone(),
            }
        })?;

        info!(
            operation = %record.operation_name,
            previous_status = %record.status,
            completed_steps = record.step_data_entries.len(),
            resolve = ?request.resolve,
            "Resuming operation"
        );

        self.run_attempt(
            definition,
            record,
            lease,
            request.resolve,
            true,
            Box::new(respond),
        )
        .await
    }

    /// Fetch a stored record.
    #[instrument(skip(self))]
    pub async fn get_operation(&self, operation_id: &str) -> Result<OperationRecord> {
        self.load(operation_id)
            .await?
            .ok_or_else(|| EngineError::OperationNotFound(operation_id.to_string()))
    }

    async fn load(&self, id: &str) -> Result<Option<OperationRecord>> {
        match self.store.load_operation(id).await {
            Ok(Some(record)) if record.id != id => Err(EngineError::LoadInvalidResponse(format!(
                "requested operation '{}' but the store returned '{}'",
                id, record.id
            ))),
            Ok(record) => Ok(record),
            Err(StoreError::Malformed(reason)) => Err(EngineError::LoadInvalidResponse(reason)),
            Err(e) => Err(EngineError::LoadFailed(e)),
        }
    }

    async fn run_attempt(
        &self,
        definition: Arc<OperationDefinition<S>>,
        record: OperationRecord,
        lease: Lease,
        resolve: ResolveDirective,
        force_save: bool,
        respond: Responder,
    ) -> Result<OperationRecord> {
        let outcome = execution::execute(Attempt {
            definition,
            record,
            lease,
            services: self.services.clone(),
            store: self.store.clone(),
            resolve,
            force_save,
            default_intervals: self.config.default_retry_intervals.clone(),
            can_continue: self.can_continue.clone(),
            respond,
        })
        .await;

        info!(
            status = %outcome.record.status,
            duration_ms = outcome.record.duration_in_ms,
            "Operation attempt finished"
        );

        if self.config.log_results {
            report::log_record(&outcome.record);
        }

        if let Some(Err(e)) = outcome.final_save {
            if self.config.propagate_final_save_errors {
                return Err(EngineError::SaveFailed(e));
            }
        }

        Ok(outcome.record)
    }
}
