use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::reasoning::SplitterConfig;
use crate::dispatch::registry::{Capability, ModelDescriptor, ProviderKind};
use crate::error::SwitchboardError;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CONFIG_FILE: &str = "switchboard.toml";

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub default_model: String,
    pub models: Vec<ModelDescriptor>,
    /// Only providers with an API key are present.
    pub providers: HashMap<ProviderKind, ProviderEndpoint>,
    pub chat: ChatSettings,
    pub reasoning: SplitterConfig,
    pub prompt_service: PromptServiceConfig,
    pub generation: GenerationSettings,
}

#[derive(Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Bound on events buffered between the provider task and the transport.
    /// One slot is kept for the terminal frame, so at least two.
    pub channel_capacity: usize,
    /// Wall-clock limit per chat request. `None` means no limit: the request
    /// runs until the provider finishes or the client goes away.
    pub request_timeout: Option<Duration>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 4096,
            channel_capacity: 32,
            request_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptServiceConfig {
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for PromptServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Catalog model used for every call in the loop. `None` uses the default model.
    pub model: Option<String>,
    /// What the loop produces, phrased as a noun ("a short original joke").
    pub subject: String,
    pub history_size: usize,
    /// How many recent entries the uniqueness judge sees.
    pub judge_window: usize,
    pub focus_temperature: f64,
    pub candidate_temperature: f64,
    pub max_output_tokens: u32,
    /// Limit on each provider call in the loop. `None` means no limit.
    pub call_timeout: Option<Duration>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: None,
            subject: "a short, original fortune-cookie message".to_string(),
            history_size: 50,
            judge_window: 10,
            focus_temperature: 1.0,
            candidate_temperature: 0.8,
            max_output_tokens: 100,
            call_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk TOML shape. Every field is optional.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    default_model: Option<String>,
    chat: ChatSection,
    reasoning: SplitterConfig,
    prompt_service: PromptServiceSection,
    generation: GenerationSection,
    /// Keyed by provider name (`openai`, `anthropic`, ...).
    providers: HashMap<String, ProviderSection>,
    models: Vec<ModelDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatSection {
    temperature: Option<f64>,
    max_output_tokens: Option<u32>,
    channel_capacity: Option<usize>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PromptServiceSection {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerationSection {
    model: Option<String>,
    subject: Option<String>,
    history_size: Option<usize>,
    judge_window: Option<usize>,
    focus_temperature: Option<f64>,
    candidate_temperature: Option<f64>,
    max_output_tokens: Option<u32>,
    call_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderSection {
    base_url: Option<String>,
}

/// Models available out of the box, subject to their provider having a key.
pub fn builtin_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gpt-4o-mini", "gpt-4o-mini", ProviderKind::OpenAi),
        ModelDescriptor::new("gpt-4o", "gpt-4o", ProviderKind::OpenAi),
        ModelDescriptor::new(
            "claude-3-5-sonnet",
            "claude-3-5-sonnet-latest",
            ProviderKind::Anthropic,
        ),
        ModelDescriptor::new(
            "claude-3-5-haiku",
            "claude-3-5-haiku-latest",
            ProviderKind::Anthropic,
        ),
        ModelDescriptor::new(
            "llama-3.3-70b",
            "llama-3.3-70b-versatile",
            ProviderKind::Groq,
        ),
        ModelDescriptor::new(
            "deepseek-r1-distill-llama-70b",
            "deepseek-r1-distill-llama-70b",
            ProviderKind::Groq,
        )
        .with_capability(Capability::Reasoning),
        ModelDescriptor::new("qwen-qwq-32b", "qwen-qwq-32b", ProviderKind::Groq)
            .with_capability(Capability::Reasoning),
        // Streams reasoning_content natively; no inline tags to strip.
        ModelDescriptor::new("deepseek-reasoner", "deepseek-reasoner", ProviderKind::DeepSeek),
        ModelDescriptor::new("deepseek-chat", "deepseek-chat", ProviderKind::DeepSeek),
    ]
}

impl Config {
    /// Load from `$SWITCHBOARD_CONFIG` (or `./switchboard.toml`) plus the
    /// environment. A missing file means defaults; a malformed one is
    /// logged and ignored.
    pub fn load() -> Self {
        let path = env::var("SWITCHBOARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        match Self::load_file(&path) {
            Ok(Some(config)) => {
                tracing::info!("loaded configuration from {}", path.display());
                config
            }
            Ok(None) => Self::from_env(),
            Err(e) => {
                tracing::error!("ignoring {}: {e}", path.display());
                Self::from_env()
            }
        }
    }

    /// Parse the file at `path`. `Ok(None)` when it does not exist.
    pub fn load_file(path: &Path) -> Result<Option<Self>, SwitchboardError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| SwitchboardError::Config(format!("read failed: {e}")))?;
        Self::from_toml_str(&text, |key| env::var(key).ok()).map(Some)
    }

    /// Defaults plus environment only.
    pub fn from_env() -> Self {
        Self::resolve(FileConfig::default(), |key| env::var(key).ok())
    }

    /// Parse TOML text, reading secrets and overrides through `lookup`.
    pub fn from_toml_str(
        text: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SwitchboardError> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| SwitchboardError::Config(e.to_string()))?;
        Ok(Self::resolve(file, lookup))
    }

    fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut providers = HashMap::new();
        for kind in ProviderKind::ALL {
            let Some(api_key) = non_empty(kind.api_key_var()) else {
                tracing::warn!(
                    "{} not set, {} models unavailable",
                    kind.api_key_var(),
                    kind.as_str()
                );
                continue;
            };
            let base_url = file
                .providers
                .get(kind.as_str())
                .and_then(|p| p.base_url.clone())
                .unwrap_or_else(|| kind.default_base_url().to_string());
            providers.insert(kind, ProviderEndpoint { base_url, api_key });
        }

        let mut models = builtin_catalog();
        models.extend(file.models);

        let chat_defaults = ChatSettings::default();
        let chat = ChatSettings {
            temperature: file.chat.temperature.unwrap_or(chat_defaults.temperature),
            max_output_tokens: file
                .chat
                .max_output_tokens
                .unwrap_or(chat_defaults.max_output_tokens),
            channel_capacity: file
                .chat
                .channel_capacity
                .unwrap_or(chat_defaults.channel_capacity)
                .max(2),
            request_timeout: file.chat.request_timeout_secs.map(Duration::from_secs),
        };

        let prompt_defaults = PromptServiceConfig::default();
        let prompt_service = PromptServiceConfig {
            url: non_empty("SWITCHBOARD_PROMPT_URL").or(file.prompt_service.url),
            timeout: file
                .prompt_service
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(prompt_defaults.timeout),
        };

        let gen_defaults = GenerationSettings::default();
        let g = file.generation;
        let generation = GenerationSettings {
            model: g.model,
            subject: g.subject.unwrap_or(gen_defaults.subject),
            history_size: g.history_size.unwrap_or(gen_defaults.history_size).max(1),
            judge_window: g.judge_window.unwrap_or(gen_defaults.judge_window),
            focus_temperature: g.focus_temperature.unwrap_or(gen_defaults.focus_temperature),
            candidate_temperature: g
                .candidate_temperature
                .unwrap_or(gen_defaults.candidate_temperature),
            max_output_tokens: g.max_output_tokens.unwrap_or(gen_defaults.max_output_tokens),
            call_timeout: g.call_timeout_secs.map(Duration::from_secs),
        };

        Config {
            bind: non_empty("SWITCHBOARD_BIND")
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            default_model: non_empty("SWITCHBOARD_DEFAULT_MODEL")
                .or(file.default_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            models,
            providers,
            chat,
            reasoning: file.reasoning,
            prompt_service,
            generation,
        }
    }
}
