// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Steadfast Core - Durable Operation Engine
//!
//! Runs named, multi-step business operations so they can be suspended and
//! later resumed from the last completed step instead of starting over.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Engine facade   start_operation / resume_operation / get    │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Execution engine   save schedule, resolve gate, status      │◄──► OperationStore
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Operation context   log / step / pause / output             │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌────────────────────────────┐   ┌─────────────────────────────┐
//! │  Step memoizer             │──►│  Retry executor             │
//! └────────────────────────────┘   └─────────────────────────────┘
//! ```
//!
//! # Steps
//!
//! A step is a named unit of work whose result is journaled on the record.
//! On resume, a journaled step returns its stored result without running
//! again, so side effects such as charging a card happen at most once per
//! operation.
//!
//! # Save models
//!
//! | Model | Saves |
//! |-------|-------|
//! | `never` | only interrupted attempts |
//! | `error` | the final state of failed attempts |
//! | `rejection` (default) | the final state of failed or rejected attempts |
//! | `always` | before running, after every step, and at the end |
//!
//! Starting with a caller-chosen id, or resuming, forces `always`.
//!
//! # Resolve directives
//!
//! | Token | Response fires |
//! |-------|----------------|
//! | `^` | right after input validation |
//! | `?` | when the operation sets its output |
//! | step name | when that step completes in this attempt |
//! | absent | at the end of the attempt |
//!
//! The response fires exactly once per attempt. If the named step never runs
//! (including because it was replayed from the journal), it fires at the end.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use steadfast_core::{Engine, MemoryStore, OperationContext, OperationDefinition, StartOperation};
//!
//! let engine = Engine::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .services(())
//!     .operation(OperationDefinition::from_fn("greet", |ctx: OperationContext<()>| async move {
//!         let name: String = ctx.step("lookup", || async { Ok("world".to_string()) }).await?;
//!         ctx.output(format!("hello {}", name))?;
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! let record = engine
//!     .start_operation(StartOperation::new("greet", serde_json::json!({})), |response| {
//!         println!("{:?}", response.status);
//!     })
//!     .await?;
//! ```

#![deny(missing_docs)]

/// Error classification and client-facing redaction.
pub mod classify;

/// Engine configuration loaded from environment variables.
pub mod config;

/// Capability handle for operation logic.
pub mod context;

/// Operation definitions and registry.
pub mod definition;

/// Engine facade: start, resume and get.
pub mod engine;

/// Error types for operations, stores and the facade.
pub mod error;

/// Execution of one operation attempt.
mod execution;

/// End-of-attempt summary logging.
pub mod report;

/// Retry executor with explicit backoff schedules.
pub mod retry;

/// Step memoization.
pub mod step;

/// Storage collaborator trait and in-memory store.
pub mod store;

/// Records, statuses, save models, resolve directives and responses.
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use context::{OperationContext, StepOptions};
pub use definition::{Operation, OperationDefinition, OperationRegistry};
pub use engine::{Engine, EngineBuilder, ResumeOperation, StartOperation};
pub use error::{EngineError, ErrorKind, OperationError, OperationResult, Result, StoreError};
pub use store::{MemoryStore, OperationStore};
pub use types::{
    LogEntry, OperationRecord, OperationResponse, OperationStatus, ResolveDirective, SaveModel,
    StatusCategory, StepDataEntry,
};

// Re-export for implementing `Operation` and `OperationStore`
pub use async_trait::async_trait;
