// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage collaborator for operation records.
//!
//! The engine never talks to a database directly. Hosts implement
//! [`OperationStore`] for their backend; [`MemoryStore`] keeps records in
//! process and is what the demos and tests use.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::types::OperationRecord;

/// Loads and saves operation records.
///
/// Implementations must be safe to use from several attempts at once.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Load a record. `Ok(None)` when no record exists for `id`.
    async fn load_operation(&self, id: &str) -> Result<Option<OperationRecord>, StoreError>;

    /// Upsert a record by id.
    ///
    /// Stores that check revisions should reject a record whose `revision` is
    /// not greater than the stored one with [`StoreError::Conflict`].
    async fn save_operation(&self, record: &OperationRecord) -> Result<(), StoreError>;
}

/// In-process store keeping records as JSON documents.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw document under `id`, bypassing revision checks.
    ///
    /// Useful for seeding fixtures, including malformed ones.
    pub fn insert_raw(&self, id: impl Into<String>, document: Value) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), document);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn load_operation(&self, id: &str) -> Result<Option<OperationRecord>, StoreError> {
        let document = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();

        match document {
            Some(document) => serde_json::from_value(document)
                .map(Some)
                .map_err(|e| StoreError::Malformed(format!("record '{}': {}", id, e))),
            None => Ok(None),
        }
    }

    async fn save_operation(&self, record: &OperationRecord) -> Result<(), StoreError> {
        let document = serde_json::to_value(record)
            .map_err(|e| StoreError::Other(anyhow::Error::new(e)))?;

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = records.get(&record.id) {
            let stored_revision = stored
                .get("revision")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if record.revision <= stored_revision {
                return Err(StoreError::Conflict {
                    id: record.id.clone(),
                    stored: stored_revision,
                    attempted: record.revision,
                });
            }
        }

        debug!(
            operation_id = %record.id,
            revision = record.revision,
            status = %record.status,
            "Operation saved"
        );
        records.insert(record.id.clone(), document);
        Ok(())
    }
}
