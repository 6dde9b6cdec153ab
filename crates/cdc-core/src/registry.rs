use crate::{CapabilityHandler, EngineType, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping each engine to its capability handler
pub struct Registry {
    handlers: HashMap<EngineType, Arc<dyn CapabilityHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under the engine it serves
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        self.handlers.insert(handler.engine(), handler);
    }

    /// Get the handler for an engine
    pub fn resolve(&self, engine: EngineType) -> Result<Arc<dyn CapabilityHandler>> {
        self.handlers
            .get(&engine)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("No handler registered for engine '{}'", engine)))
    }

    /// List all registered engines
    pub fn list_engines(&self) -> Vec<EngineType> {
        let mut engines: Vec<_> = self.handlers.keys().copied().collect();
        engines.sort_by_key(|e| e.as_str());
        engines
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
