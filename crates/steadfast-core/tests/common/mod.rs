// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for steadfast-core integration tests.
//!
//! Provides a recording store that counts saves and can be told to fail,
//! and a response collector standing in for a transport binding.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use steadfast_core::{
    Engine, EngineBuilder, EngineConfig, MemoryStore, OperationDefinition, OperationRecord,
    OperationResponse, OperationStatus, OperationStore, StoreError, async_trait,
};

/// Install a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Store wrapper that records every save attempt and can simulate outages.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    saves: Mutex<Vec<OperationRecord>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The wrapped store, for seeding and out-of-band writes.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Save `record` without counting it.
    pub async fn seed(&self, record: &OperationRecord) {
        self.inner
            .save_operation(record)
            .await
            .expect("seeding should succeed");
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of save calls, failed ones included.
    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// Snapshots passed to every save call.
    pub fn saved(&self) -> Vec<OperationRecord> {
        self.saves.lock().unwrap().clone()
    }

    pub fn saved_statuses(&self) -> Vec<OperationStatus> {
        self.saved().iter().map(|r| r.status).collect()
    }

    pub fn reset_counts(&self) {
        self.saves.lock().unwrap().clear();
    }
}

#[async_trait]
impl OperationStore for RecordingStore {
    async fn load_operation(&self, id: &str) -> Result<Option<OperationRecord>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.load_operation(id).await
    }

    async fn save_operation(&self, record: &OperationRecord) -> Result<(), StoreError> {
        self.saves.lock().unwrap().push(record.clone());
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.save_operation(record).await
    }
}

/// Collects every response an engine sends.
#[derive(Clone, Default)]
pub struct Responses {
    received: Arc<Mutex<Vec<OperationResponse>>>,
}

impl Responses {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends to this collector.
    pub fn responder(&self) -> impl FnOnce(OperationResponse) + Send + 'static {
        let received = self.received.clone();
        move |response| received.lock().unwrap().push(response)
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<OperationResponse> {
        self.received.lock().unwrap().clone()
    }

    /// The only response; panics unless exactly one arrived.
    pub fn single(&self) -> OperationResponse {
        let received = self.received.lock().unwrap();
        assert_eq!(received.len(), 1, "expected exactly one response");
        received[0].clone()
    }
}

/// Config used by most tests: no default retries.
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_default_retry_intervals(Vec::new())
}

/// Builder wired to `store` with unit services.
pub fn builder(store: &Arc<RecordingStore>) -> EngineBuilder<()> {
    init_tracing();
    Engine::builder()
        .store(store.clone())
        .services(())
        .config(test_config())
}

/// Engine with one definition.
pub fn engine_with(store: &Arc<RecordingStore>, definition: OperationDefinition<()>) -> Engine<()> {
    builder(store)
        .operation(definition)
        .build()
        .expect("engine should build")
}

pub fn ms(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}
