//! Configuration resolution: defaults, TOML overrides, key-gated
//! providers, and environment precedence.

use std::collections::HashMap;
use std::time::Duration;

use switchboard::config::{Config, DEFAULT_BIND, DEFAULT_MODEL, builtin_catalog};
use switchboard::dispatch::registry::{Capability, ProviderKind};
use switchboard::error::SwitchboardError;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn empty_file_gives_defaults() {
    let config = Config::from_toml_str("", env(&[])).unwrap();
    assert_eq!(config.bind, DEFAULT_BIND);
    assert_eq!(config.default_model, DEFAULT_MODEL);
    assert!(config.providers.is_empty());
    assert_eq!(config.models, builtin_catalog());
    assert_eq!(config.chat.channel_capacity, 32);
    assert_eq!(config.chat.request_timeout, None);
    assert_eq!(config.prompt_service.url, None);
    assert_eq!(config.generation.history_size, 50);
    assert_eq!(config.generation.judge_window, 10);
    assert_eq!(config.generation.call_timeout, None);
    assert_eq!(config.reasoning.tag, "think");
}

#[test]
fn providers_require_a_key() {
    let config = Config::from_toml_str(
        "",
        env(&[("GROQ_API_KEY", "gsk-1"), ("OPENAI_API_KEY", "  ")]),
    )
    .unwrap();

    assert_eq!(config.providers.len(), 1);
    let groq = &config.providers[&ProviderKind::Groq];
    assert_eq!(groq.api_key, "gsk-1");
    assert_eq!(groq.base_url, ProviderKind::Groq.default_base_url());
    assert!(!format!("{groq:?}").contains("gsk-1"), "key must be redacted");
}

#[test]
fn file_overrides_settings() {
    let text = r#"
        bind = "0.0.0.0:9000"
        default_model = "llama-3.3-70b"

        [chat]
        temperature = 0.2
        max_output_tokens = 512
        channel_capacity = 0
        request_timeout_secs = 30

        [reasoning]
        tag = "reasoning"
        start_with_reasoning = true

        [prompt_service]
        url = "http://prompts.internal/system"
        timeout_secs = 2

        [generation]
        model = "gpt-4o"
        subject = "a haiku"
        history_size = 20
        call_timeout_secs = 10

        [providers.openai]
        base_url = "http://localhost:4000/v1/chat/completions"
    "#;
    let config = Config::from_toml_str(text, env(&[("OPENAI_API_KEY", "sk-1")])).unwrap();

    assert_eq!(config.bind, "0.0.0.0:9000");
    assert_eq!(config.default_model, "llama-3.3-70b");
    assert_eq!(config.chat.temperature, 0.2);
    assert_eq!(config.chat.max_output_tokens, 512);
    assert_eq!(config.chat.channel_capacity, 2, "capacity is clamped to at least two");
    assert_eq!(config.chat.request_timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.reasoning.tag, "reasoning");
    assert!(config.reasoning.start_with_reasoning);
    assert_eq!(
        config.prompt_service.url.as_deref(),
        Some("http://prompts.internal/system")
    );
    assert_eq!(config.prompt_service.timeout, Duration::from_secs(2));
    assert_eq!(config.generation.model.as_deref(), Some("gpt-4o"));
    assert_eq!(config.generation.subject, "a haiku");
    assert_eq!(config.generation.history_size, 20);
    assert_eq!(config.generation.call_timeout, Some(Duration::from_secs(10)));
    assert_eq!(
        config.providers[&ProviderKind::OpenAi].base_url,
        "http://localhost:4000/v1/chat/completions"
    );
}

#[test]
fn extra_models_extend_builtin_catalog() {
    let text = r#"
        [[models]]
        id = "local-r1"
        upstream_id = "deepseek-r1:14b"
        provider = "openai"
        capabilities = ["reasoning"]
    "#;
    let config = Config::from_toml_str(text, env(&[])).unwrap();

    assert_eq!(config.models.len(), builtin_catalog().len() + 1);
    let added = config.models.last().unwrap();
    assert_eq!(added.id, "local-r1");
    assert_eq!(added.upstream_id, "deepseek-r1:14b");
    assert_eq!(added.provider, ProviderKind::OpenAi);
    assert!(added.has(Capability::Reasoning));
}

#[test]
fn environment_wins_over_file() {
    let text = r#"
        bind = "0.0.0.0:9000"
        default_model = "gpt-4o"
        [prompt_service]
        url = "http://from-file"
    "#;
    let config = Config::from_toml_str(
        text,
        env(&[
            ("SWITCHBOARD_BIND", "127.0.0.1:1"),
            ("SWITCHBOARD_DEFAULT_MODEL", "claude-3-5-haiku"),
            ("SWITCHBOARD_PROMPT_URL", "http://from-env"),
        ]),
    )
    .unwrap();

    assert_eq!(config.bind, "127.0.0.1:1");
    assert_eq!(config.default_model, "claude-3-5-haiku");
    assert_eq!(config.prompt_service.url.as_deref(), Some("http://from-env"));
}

#[test]
fn unknown_top_level_key_is_rejected() {
    let err = Config::from_toml_str("colour = \"blue\"", env(&[])).unwrap_err();
    assert!(matches!(err, SwitchboardError::Config(_)));
}

#[test]
fn missing_file_is_not_an_error() {
    let path = std::env::temp_dir().join("switchboard-config-does-not-exist.toml");
    assert!(Config::load_file(&path).unwrap().is_none());
}
