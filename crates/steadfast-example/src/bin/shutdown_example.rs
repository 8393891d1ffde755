// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shutdown Example - Demonstrates interrupting a batch and resuming it after restart.
//!
//! A batch operation processes one item per step. The engine's cancellation
//! token fires on Ctrl+C or after a short timer. The in-flight item finishes,
//! the operation is stored as interrupted, and a fresh engine sharing the same
//! store resumes the batch. Every item is processed exactly once.
//!
//! Run with: cargo run -p steadfast-example --bin shutdown_example

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use steadfast_core::{
    Engine, EngineConfig, MemoryStore, OperationContext, OperationDefinition, OperationStatus,
    OperationStore, ResumeOperation, SaveModel, StartOperation,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Batch {
    items: Vec<String>,
}

/// Counts how often each item was processed.
#[derive(Default)]
struct Warehouse {
    processed: Mutex<BTreeMap<String, u32>>,
}

impl Warehouse {
    async fn process(&self, item: &str) -> usize {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut processed = self
            .processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *processed.entry(item.to_string()).or_default() += 1;
        processed.len()
    }

    fn counts(&self) -> BTreeMap<String, u32> {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn batch_operation() -> OperationDefinition<Warehouse> {
    OperationDefinition::from_fn("batch", |ctx: OperationContext<Warehouse>| async move {
        let batch: Batch = ctx.input_as()?;
        let warehouse = ctx.services();

        let mut done = 0;
        for item in &batch.items {
            let step_name = format!("item-{}", item);
            done = ctx
                .step(&step_name, || async { Ok(warehouse.process(item).await) })
                .await?;
            ctx.pause(Duration::from_millis(20)).await;
        }

        ctx.log(format!("processed {} items", done));
        ctx.output(json!({ "processed": batch.items.len() }))?;
        Ok(())
    })
    .with_save_model(SaveModel::Always)
    .with_input_type::<Batch>()
}

fn build_engine(
    store: Arc<dyn OperationStore>,
    warehouse: Arc<Warehouse>,
    config: EngineConfig,
    token: Option<CancellationToken>,
) -> anyhow::Result<Engine<Warehouse>> {
    let mut builder = Engine::builder()
        .store(store)
        .shared_services(warehouse)
        .config(config)
        .operation(batch_operation());
    if let Some(token) = token {
        builder = builder.cancellation_token(token);
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("=== Shutdown Example: interrupt and resume ===");

    let config = EngineConfig::from_env()?;
    let store: Arc<dyn OperationStore> = Arc::new(MemoryStore::new());
    let warehouse = Arc::new(Warehouse::default());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Ctrl+C received, stopping");
            }
            _ = tokio::time::sleep(Duration::from_millis(350)) => {
                info!("Shutdown timer elapsed, stopping");
            }
        }
        trigger.cancel();
    });

    let first = build_engine(
        store.clone(),
        warehouse.clone(),
        config.clone(),
        Some(shutdown),
    )?;

    let items: Vec<String> = (1..=8).map(|n| format!("sku-{:03}", n)).collect();
    let operation_id = format!("batch-{}", uuid::Uuid::new_v4());

    let record = first
        .start_operation(
            StartOperation::new("batch", json!({ "items": items })).with_id(operation_id.clone()),
            |response| {
                info!(
                    status = %response.status,
                    last_step = %response.last_completed_step_token(),
                    "First run answered"
                );
            },
        )
        .await?;

    info!(
        status = %record.status,
        journaled = record.step_data_entries.len(),
        "First run ended"
    );
    if record.status != OperationStatus::Interrupted {
        warn!("Batch finished before shutdown; nothing to resume");
        return Ok(());
    }

    // Simulated restart: a new engine over the same store.
    let second = build_engine(store, warehouse.clone(), config, None)?;
    let record = second
        .resume_operation(ResumeOperation::new(operation_id), |response| {
            info!(
                status = %response.status,
                output = ?response.output,
                "Resume answered"
            );
        })
        .await?;

    info!(
        status = %record.status,
        duration_ms = record.duration_in_ms,
        "Batch finished"
    );

    for (item, count) in warehouse.counts() {
        if count == 1 {
            info!(item = %item, "Processed once");
        } else {
            warn!(item = %item, count, "Processed more than once");
        }
    }

    Ok(())
}
