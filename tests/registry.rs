//! Model registry and router: default substitution, middleware selection,
//! and stability of resolved bindings.

mod common;

use std::sync::Arc;

use common::{ScriptedProvider, bindings, registry_with};
use switchboard::dispatch::reasoning::SplitterConfig;
use switchboard::dispatch::registry::{
    Capability, Middleware, ModelDescriptor, ProviderKind, Registry,
};
use switchboard::dispatch::{Provider, ProviderRequest, collect_answer};
use switchboard::error::SwitchboardError;
use switchboard::messages::Message;
use tokio_util::sync::CancellationToken;

fn provider(name: &str) -> Arc<dyn Provider> {
    Arc::new(ScriptedProvider::answers(name, &["ok"]))
}

#[test]
fn resolve_known_model() {
    let registry = registry_with(provider("groq"));
    let route = registry.resolve(Some("thinker"));
    assert_eq!(route.descriptor.id, "thinker");
    assert_eq!(route.descriptor.upstream_id, "thinker-upstream");
}

#[test]
fn resolve_is_referentially_stable() {
    let registry = registry_with(provider("groq"));
    let a = registry.resolve(Some("thinker"));
    let b = registry.resolve(Some("thinker"));
    assert!(Arc::ptr_eq(&a.binding, &b.binding));
    assert_eq!(a.middleware, b.middleware);
    assert_eq!(a.descriptor, b.descriptor);
}

#[test]
fn unknown_absent_and_blank_ids_substitute_default() {
    let registry = registry_with(provider("groq"));
    for requested in [None, Some(""), Some("   "), Some("no-such-model")] {
        let route = registry.resolve(requested);
        assert_eq!(route.descriptor.id, "plain", "requested {requested:?}");
    }
}

#[test]
fn strict_lookup_reports_not_found_with_suggestions() {
    let registry = registry_with(provider("groq"));
    match registry.lookup("think") {
        Err(SwitchboardError::ModelNotFound { model, suggestions }) => {
            assert_eq!(model, "think");
            assert_eq!(suggestions, vec!["thinker".to_string()]);
        }
        other => panic!("expected ModelNotFound, got {other:?}"),
    }
}

#[test]
fn reasoning_capability_wraps_with_splitter() {
    let registry = registry_with(provider("groq"));
    assert_eq!(
        registry.resolve(Some("thinker")).middleware,
        Middleware::ReasoningSplitter
    );
    assert_eq!(
        registry.resolve(Some("plain")).middleware,
        Middleware::Passthrough
    );
}

#[test]
fn unsupported_provider_kind_falls_back_to_passthrough() {
    let raw = provider("anthropic");
    let registry = Registry::new(
        vec![
            ModelDescriptor::new("claude", "claude-up", ProviderKind::Anthropic)
                .with_capability(Capability::Reasoning),
        ],
        &bindings(vec![(ProviderKind::Anthropic, raw.clone())]),
        "claude",
        &SplitterConfig::default(),
    )
    .unwrap();

    let route = registry.resolve(Some("claude"));
    assert_eq!(route.middleware, Middleware::Passthrough);
    assert!(Arc::ptr_eq(&route.binding, &raw));
}

#[test]
fn models_without_binding_are_dropped() {
    let registry = Registry::new(
        vec![
            ModelDescriptor::new("a", "a", ProviderKind::OpenAi),
            ModelDescriptor::new("b", "b", ProviderKind::DeepSeek),
        ],
        &bindings(vec![(ProviderKind::OpenAi, provider("openai"))]),
        "a",
        &SplitterConfig::default(),
    )
    .unwrap();

    assert!(registry.get("a").is_some());
    assert!(registry.get("b").is_none());
    let ids: Vec<&str> = registry.list_models().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[test]
fn unavailable_default_model_is_a_config_error() {
    let result = Registry::new(
        vec![ModelDescriptor::new("a", "a", ProviderKind::OpenAi)],
        &bindings(vec![]),
        "a",
        &SplitterConfig::default(),
    );
    assert!(matches!(result, Err(SwitchboardError::Config(_))));
}

#[tokio::test]
async fn wrapped_binding_strips_reasoning_from_answer() {
    let raw: Arc<dyn Provider> = Arc::new(ScriptedProvider::answers(
        "groq",
        &["<think>", "hmm", "</think>", "42"],
    ));
    let registry = registry_with(raw);
    let route = registry.resolve(Some("thinker"));

    let stream = route.binding.stream_generate(ProviderRequest {
        model: route.descriptor.upstream_id.clone(),
        system: String::new(),
        messages: vec![Message::user_text("q")],
        temperature: 0.0,
        max_output_tokens: 16,
        cancellation_token: CancellationToken::new(),
    });
    assert_eq!(collect_answer(stream).await.unwrap(), "42");
}
