//! Model-to-provider registry built once at startup from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::Config;

use super::provider::{create_provider, VisionProvider};

/// Maps model identifiers to the provider adapter that serves them. The
/// dispatcher looks up each candidate model here after the allowlist check.
pub struct ModelRegistry {
    providers: HashMap<String, Arc<dyn VisionProvider>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let timeout = config.analysis.provider_timeout();
        let mut registry = Self::new();

        for model in &config.models {
            registry.register(&model.id, Arc::from(create_provider(model, timeout)));
        }

        // Allowlisted models without a provider binding can never run;
        // surface that at startup rather than at dispatch time.
        for id in &config.analysis.allowlist {
            if !registry.providers.contains_key(id) {
                warn!(model = %id, "allowlisted model has no provider binding");
            }
        }

        registry
    }

    pub fn register(&mut self, model_id: &str, provider: Arc<dyn VisionProvider>) {
        self.providers.insert(model_id.to_string(), provider);
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn VisionProvider>> {
        self.providers.get(model_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
