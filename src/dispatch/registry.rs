use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dispatch::Provider;
use crate::dispatch::http::{self, ApiFormat, HttpProvider};
use crate::dispatch::reasoning::{ReasoningSplitter, SplitterConfig};
use crate::error::SwitchboardError;

/// Vendor family a model is served by. One binding per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Groq,
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Groq,
        ProviderKind::DeepSeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
        }
    }

    pub fn api_format(&self) -> ApiFormat {
        match self {
            Self::Anthropic => ApiFormat::Anthropic,
            _ => ApiFormat::OpenAi,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::DeepSeek => "https://api.deepseek.com/chat/completions",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Whether delimiter-tag reasoning extraction can wrap this provider.
    /// Anthropic streams thinking as typed deltas, never inline tags.
    pub fn supports_tag_extraction(&self) -> bool {
        !matches!(self, Self::Anthropic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Output interleaves reasoning and answer text.
    Reasoning,
}

/// Catalog entry. Immutable once the registry is built.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelDescriptor {
    /// Catalog key clients send as `model`.
    pub id: String,
    /// Model name the vendor API expects.
    pub upstream_id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl ModelDescriptor {
    pub fn new(id: &str, upstream_id: &str, provider: ProviderKind) -> Self {
        Self {
            id: id.to_string(),
            upstream_id: upstream_id.to_string(),
            provider,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// What the router put between the caller and the raw provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Middleware {
    Passthrough,
    ReasoningSplitter,
}

/// A resolved model: descriptor plus the (possibly wrapped) binding.
#[derive(Clone)]
pub struct Route {
    pub descriptor: ModelDescriptor,
    pub binding: Arc<dyn Provider>,
    pub middleware: Middleware,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("descriptor", &self.descriptor)
            .field("binding", &self.binding.name())
            .field("middleware", &self.middleware)
            .finish()
    }
}

/// Static model catalog and router. Read-only after construction; every
/// route (including its middleware wrapper) is built once up front so
/// repeated resolution returns the same binding.
pub struct Registry {
    routes: HashMap<String, Route>,
    default_model: String,
}

impl Registry {
    /// Build routes for every descriptor whose provider has a binding.
    /// Descriptors without a binding are dropped with a warning. Fails only
    /// when the default model ends up unavailable.
    pub fn new(
        descriptors: Vec<ModelDescriptor>,
        bindings: &HashMap<ProviderKind, Arc<dyn Provider>>,
        default_model: &str,
        splitter: &SplitterConfig,
    ) -> Result<Self, SwitchboardError> {
        let mut routes = HashMap::new();

        for descriptor in descriptors {
            let Some(raw) = bindings.get(&descriptor.provider) else {
                tracing::warn!(
                    model = %descriptor.id,
                    provider = descriptor.provider.as_str(),
                    "no binding for provider, model unavailable"
                );
                continue;
            };

            let (binding, middleware) = if !descriptor.has(Capability::Reasoning) {
                (raw.clone(), Middleware::Passthrough)
            } else if descriptor.provider.supports_tag_extraction() {
                let wrapped: Arc<dyn Provider> =
                    Arc::new(ReasoningSplitter::new(raw.clone(), splitter.clone()));
                (wrapped, Middleware::ReasoningSplitter)
            } else {
                tracing::debug!(
                    model = %descriptor.id,
                    provider = descriptor.provider.as_str(),
                    "reasoning extraction unsupported for provider, using passthrough"
                );
                (raw.clone(), Middleware::Passthrough)
            };

            if routes.contains_key(&descriptor.id) {
                tracing::warn!(model = %descriptor.id, "duplicate catalog entry, later one wins");
            }
            routes.insert(
                descriptor.id.clone(),
                Route {
                    descriptor,
                    binding,
                    middleware,
                },
            );
        }

        if !routes.contains_key(default_model) {
            return Err(SwitchboardError::Config(format!(
                "default model {default_model} is not available (is its provider configured?)"
            )));
        }

        Ok(Self {
            routes,
            default_model: default_model.to_string(),
        })
    }

    /// Build HTTP bindings for every configured provider endpoint.
    pub fn from_config(config: &Config) -> Result<Self, SwitchboardError> {
        let client = http::build_client();
        let bindings: HashMap<ProviderKind, Arc<dyn Provider>> = config
            .providers
            .iter()
            .map(|(kind, endpoint)| {
                let provider: Arc<dyn Provider> = Arc::new(HttpProvider::new(
                    client.clone(),
                    kind.as_str(),
                    endpoint.base_url.clone(),
                    endpoint.api_key.clone(),
                    kind.api_format(),
                ));
                (*kind, provider)
            })
            .collect();

        Self::new(
            config.models.clone(),
            &bindings,
            &config.default_model,
            &config.reasoning,
        )
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn get(&self, model: &str) -> Option<&Route> {
        self.routes.get(model)
    }

    /// Strict lookup. Unknown ids are a `ModelNotFound` with suggestions.
    pub fn lookup(&self, model: &str) -> Result<&Route, SwitchboardError> {
        self.routes
            .get(model)
            .ok_or_else(|| SwitchboardError::ModelNotFound {
                model: model.to_string(),
                suggestions: self.suggest_models(model),
            })
    }

    /// Router entry point. Absent, blank, or unknown ids resolve to the
    /// default model; that substitution is logged, never an error.
    pub fn resolve(&self, model: Option<&str>) -> &Route {
        let requested = model.map(str::trim).filter(|m| !m.is_empty());
        let Some(requested) = requested else {
            return self.default_route();
        };

        match self.lookup(requested) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(default = %self.default_model, "{}, using default", e.user_message());
                self.default_route()
            }
        }
    }

    fn default_route(&self) -> &Route {
        // Presence is checked in `new` and routes are never mutated.
        &self.routes[&self.default_model]
    }

    /// Catalog sorted by id.
    pub fn list_models(&self) -> Vec<&ModelDescriptor> {
        let mut models: Vec<&ModelDescriptor> =
            self.routes.values().map(|r| &r.descriptor).collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Suggest similar model names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest_models(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .routes
            .keys()
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .cloned()
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }
}
