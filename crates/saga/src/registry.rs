//! Registry mapping definition names to saga definitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError};

/// Holds every saga definition known to the process.
///
/// Populated once at startup and shared read-only behind an `Arc`;
/// there is no teardown because the registry holds no mutable state
/// besides the definition map itself.
#[derive(Default)]
pub struct StepRegistry {
    definitions: HashMap<String, Arc<SagaDefinition>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, failing if the name is already taken.
    pub fn register(&mut self, definition: SagaDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.name) {
            return Err(SagaError::DuplicateDefinition(definition.name));
        }
        tracing::debug!(definition = %definition.name, steps = definition.steps.len(), "saga definition registered");
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Looks up a definition by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<SagaDefinition>> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| SagaError::UnknownDefinition(name.to_string()))
    }

    /// Iterates over all registered definitions.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<SagaDefinition>> {
        self.definitions.values()
    }

    /// Returns the number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
