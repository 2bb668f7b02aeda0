//! Model resolver: maps model identifiers and aliases onto providers.
//!
//! Identifiers take the form `provider/model` (`openai/gpt-4o-mini`). A bare
//! model name is served by the default provider, an alias from the `models`
//! table expands to its target first, and an empty identifier means the
//! configured default model.

use std::collections::HashMap;
use std::sync::Arc;

use planact_config::EngineConfig;
use planact_core::error::{Error, Result};
use planact_core::provider::Provider;
use tracing::debug;

/// A model identifier resolved to the provider that serves it.
#[derive(Clone)]
pub struct ResolvedModel {
    /// Canonical `provider/model` id
    pub canonical_id: String,

    /// Model name as the provider knows it (the part after `provider/`)
    pub model_name: String,

    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("canonical_id", &self.canonical_id)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Resolves model handles against registered providers.
pub struct ModelResolver {
    providers: HashMap<String, Arc<dyn Provider>>,
    aliases: HashMap<String, String>,
    default_provider: String,
    default_model: String,
}

impl ModelResolver {
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            aliases: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
        }
    }

    /// Build an empty resolver from configuration (defaults + alias table).
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut resolver = Self::new(&config.default_provider, &config.default_model);
        resolver.aliases = config.models.clone();
        resolver
    }

    /// Register a provider under a name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(name, provider);
        self
    }

    /// Add an alias (e.g. `fast` → `openai/gpt-4o-mini`).
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    /// Resolve a model handle; `None` or an empty handle means the default model.
    pub fn resolve(&self, handle: Option<&str>) -> Result<ResolvedModel> {
        let requested = handle
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(self.default_model.as_str());

        let target = self
            .aliases
            .get(requested)
            .map(String::as_str)
            .unwrap_or(requested);

        let (provider_name, model_name) = match target.split_once('/') {
            Some((provider, model)) => (provider, model),
            None => (self.default_provider.as_str(), target),
        };

        if model_name.is_empty() {
            return Err(Error::config(format!("unknown model identifier '{requested}'")));
        }

        let provider = self.providers.get(provider_name).cloned().ok_or_else(|| {
            Error::config(format!(
                "provider '{provider_name}' for model '{requested}' is not configured"
            ))
        })?;

        let canonical_id = format!("{provider_name}/{model_name}");
        debug!(requested, canonical = %canonical_id, "Resolved model");

        Ok(ResolvedModel {
            canonical_id,
            model_name: model_name.to_string(),
            provider,
        })
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planact_core::error::ProviderError;
    use planact_core::message::Message;
    use planact_core::provider::{ProviderRequest, ProviderResponse};

    struct NamedProvider(&'static str);

    #[async_trait::async_trait]
    impl Provider for NamedProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant("ok"),
                usage: None,
                model: request.model,
                finish_reason: None,
            })
        }
    }

    fn resolver() -> ModelResolver {
        ModelResolver::new("openai", "openai/gpt-4o-mini")
            .with_provider("openai", Arc::new(NamedProvider("openai")))
            .with_provider("local", Arc::new(NamedProvider("local")))
    }

    #[test]
    fn prefixed_model_routes_to_provider() {
        let resolved = resolver().resolve(Some("local/llama3")).unwrap();
        assert_eq!(resolved.canonical_id, "local/llama3");
        assert_eq!(resolved.model_name, "llama3");
        assert_eq!(resolved.provider.name(), "local");
    }

    #[test]
    fn bare_model_uses_default_provider() {
        let resolved = resolver().resolve(Some("gpt-4o")).unwrap();
        assert_eq!(resolved.canonical_id, "openai/gpt-4o");
        assert_eq!(resolved.provider.name(), "openai");
    }

    #[test]
    fn missing_handle_uses_default_model() {
        let resolved = resolver().resolve(None).unwrap();
        assert_eq!(resolved.canonical_id, "openai/gpt-4o-mini");
        let resolved = resolver().resolve(Some("  ")).unwrap();
        assert_eq!(resolved.canonical_id, "openai/gpt-4o-mini");
    }

    #[test]
    fn alias_expands() {
        let mut resolver = resolver();
        resolver.alias("fast", "local/phi3");
        let resolved = resolver.resolve(Some("fast")).unwrap();
        assert_eq!(resolved.canonical_id, "local/phi3");
    }

    #[test]
    fn unconfigured_provider_is_config_error() {
        let err = resolver().resolve(Some("anthropic/claude")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn empty_model_name_is_config_error() {
        let err = resolver().resolve(Some("openai/")).unwrap_err();
        assert!(err.to_string().contains("unknown model identifier"));
    }

    #[test]
    fn from_config_carries_aliases() {
        let mut config = EngineConfig::default();
        config.models.insert("smart".into(), "openai/gpt-4o".into());
        let resolver = ModelResolver::from_config(&config)
            .with_provider("openai", Arc::new(NamedProvider("openai")));
        assert_eq!(
            resolver.resolve(Some("smart")).unwrap().canonical_id,
            "openai/gpt-4o"
        );
        assert_eq!(resolver.list(), vec!["openai"]);
    }
}
