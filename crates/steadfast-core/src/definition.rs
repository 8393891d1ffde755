// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation definitions and the registry they are looked up in.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::OperationContext;
use crate::error::{EngineError, OperationError, OperationResult};
use crate::types::SaveModel;

/// Business logic of an operation.
#[async_trait]
pub trait Operation<S>: Send + Sync {
    /// Run the logic against the context of one attempt.
    async fn run(&self, ctx: OperationContext<S>) -> OperationResult<()>;
}

/// Adapts an async closure to [`Operation`].
pub struct FnOperation<F> {
    func: F,
}

#[async_trait]
impl<S, F, Fut> Operation<S> for FnOperation<F>
where
    S: Send + Sync + 'static,
    F: Fn(OperationContext<S>) -> Fut + Send + Sync,
    Fut: Future<Output = OperationResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: OperationContext<S>) -> OperationResult<()> {
        (self.func)(ctx).await
    }
}

/// Input check run before the operation starts.
pub type InputValidator = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// A named operation: its logic, checkpoint policy and input validator.
pub struct OperationDefinition<S> {
    name: String,
    save_model: SaveModel,
    validator: Option<InputValidator>,
    operation: Arc<dyn Operation<S>>,
}

impl<S> Clone for OperationDefinition<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            save_model: self.save_model,
            validator: self.validator.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<S> OperationDefinition<S>
where
    S: Send + Sync + 'static,
{
    /// Define an operation backed by an [`Operation`] implementation.
    pub fn new<O>(name: impl Into<String>, operation: O) -> Self
    where
        O: Operation<S> + 'static,
    {
        Self {
            name: name.into(),
            save_model: SaveModel::default(),
            validator: None,
            operation: Arc::new(operation),
        }
    }

    /// Define an operation backed by an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(OperationContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult<()>> + Send + 'static,
    {
        Self::new(name, FnOperation { func })
    }

    /// Set the checkpoint policy.
    pub fn with_save_model(mut self, save_model: SaveModel) -> Self {
        self.save_model = save_model;
        self
    }

    /// Validate input with `validator` before running.
    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Validate input by decoding it as `T`.
    pub fn with_input_type<T: DeserializeOwned>(self) -> Self {
        self.with_validator(|input| {
            serde_json::from_value::<T>(input.clone())?;
            Ok(())
        })
    }
}

impl<S> OperationDefinition<S> {
    /// Registry key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checkpoint policy.
    pub fn save_model(&self) -> SaveModel {
        self.save_model
    }

    /// Run the validator, mapping a refusal to a malformed-input error.
    pub fn validate_input(&self, input: &Value) -> OperationResult<()> {
        match &self.validator {
            Some(validator) => {
                validator(input).map_err(|e| OperationError::MalformedInput(format!("{:#}", e)))
            }
            None => Ok(()),
        }
    }

    pub(crate) fn operation(&self) -> Arc<dyn Operation<S>> {
        self.operation.clone()
    }
}

impl<S> std::fmt::Debug for OperationDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDefinition")
            .field("name", &self.name)
            .field("save_model", &self.save_model)
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Immutable name-to-definition mapping, built once.
pub struct OperationRegistry<S> {
    definitions: HashMap<String, Arc<OperationDefinition<S>>>,
}

impl<S> OperationRegistry<S> {
    /// Build the registry. Duplicate names are rejected.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = OperationDefinition<S>>,
    ) -> Result<Self, EngineError> {
        let mut map = HashMap::new();
        for definition in definitions {
            let name = definition.name().to_string();
            if map.insert(name.clone(), Arc::new(definition)).is_some() {
                return Err(EngineError::DuplicateDefinition(name));
            }
        }
        Ok(Self { definitions: map })
    }

    /// Look up a definition.
    pub fn get(&self, name: &str) -> Option<Arc<OperationDefinition<S>>> {
        self.definitions.get(name).cloned()
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
