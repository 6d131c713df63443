//! Short-text generation that steers away from recently produced output.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationSettings;
use crate::dispatch::registry::Registry;
use crate::dispatch::{Provider, ProviderRequest, collect_answer};
use crate::error::SwitchboardError;
use crate::messages::Message;

pub const MAX_HISTORY_SIZE: usize = 50;

/// Judge reply meaning "no collision with recent history".
pub const UNIQUE_SENTINEL: &str = "UNIQUE";

/// Separator between history entries in the judge prompt.
pub const HISTORY_DELIMITER: &str = "\n---\n";

pub const FOCUS_SYSTEM: &str = "You write brief, concrete creative briefs. \
Reply with the brief only, one or two sentences, no preamble.";

pub const CANDIDATE_SYSTEM: &str = "You write short pieces exactly to the brief you are given. \
Reply with the piece only, no quotes, no commentary.";

pub const JUDGE_SYSTEM: &str = "You check new text against previously published texts. \
If the new text is clearly distinct in idea and wording from every previous text, reply with \
exactly UNIQUE. Otherwise reply with one sentence naming which previous text it resembles and how.";

const JUDGE_TEMPERATURE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRecord {
    pub text: String,
    /// Monotonic insertion order within this process.
    pub inserted_at: u64,
}

#[derive(Debug, Default)]
struct HistoryState {
    records: VecDeque<GenerationRecord>,
    next_seq: u64,
}

/// Bounded FIFO of accepted generations, shared by every concurrent
/// `generate_unique` call. Append-and-evict happens under one lock, so the
/// length never exceeds capacity even momentarily.
#[derive(Debug)]
pub struct HistoryBuffer {
    capacity: usize,
    state: Mutex<HistoryState>,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(HistoryState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `text`, evicting the oldest entries past capacity.
    /// Returns how many entries were evicted.
    pub async fn push(&self, text: String) -> usize {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.records.push_back(GenerationRecord {
            text,
            inserted_at: seq,
        });

        let mut evicted = 0;
        while state.records.len() > self.capacity {
            state.records.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The most recent `k` texts, oldest first.
    pub async fn recent(&self, k: usize) -> Vec<String> {
        let state = self.state.lock().await;
        let skip = state.records.len().saturating_sub(k);
        state
            .records
            .iter()
            .skip(skip)
            .map(|r| r.text.clone())
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<GenerationRecord> {
        self.state.lock().await.records.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    /// End of life: drop every record. Returns how many were held.
    pub async fn dispose(&self) -> usize {
        let mut state = self.state.lock().await;
        let held = state.records.len();
        state.records.clear();
        held
    }
}

/// Produces short text that a judge call has compared against recent
/// history, with at most one regeneration when the judge sees a collision.
pub struct UniqueGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    history: Arc<HistoryBuffer>,
    settings: GenerationSettings,
}

impl UniqueGenerator {
    /// `model` is the upstream model name passed to `provider`.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        history: Arc<HistoryBuffer>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            history,
            settings,
        }
    }

    /// Bind to the configured generation model (or the default model).
    pub fn from_registry(
        registry: &Registry,
        history: Arc<HistoryBuffer>,
        settings: GenerationSettings,
    ) -> Self {
        let route = registry.resolve(settings.model.as_deref());
        tracing::info!(model = %route.descriptor.id, "generation loop bound");
        Self::new(
            route.binding.clone(),
            route.descriptor.upstream_id.clone(),
            history,
            settings,
        )
    }

    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    /// Generate one accepted text and record it in history.
    ///
    /// Any failed provider call fails the whole operation; nothing is
    /// recorded in that case. A regenerated candidate is accepted without
    /// a second judgement.
    pub async fn generate_unique(&self) -> Result<String, SwitchboardError> {
        let subject = &self.settings.subject;

        let focus = self
            .call(
                "writing a focusing prompt",
                FOCUS_SYSTEM,
                format!("Write a fresh, specific brief for {subject}."),
                self.settings.focus_temperature,
            )
            .await?;

        let mut candidate = self
            .call(
                "generating a candidate",
                CANDIDATE_SYSTEM,
                focus,
                self.settings.candidate_temperature,
            )
            .await?;

        let recent = self.history.recent(self.settings.judge_window).await;
        let verdict = self
            .call_raw(
                "judging uniqueness",
                JUDGE_SYSTEM,
                judge_prompt(&recent, &candidate),
                JUDGE_TEMPERATURE,
            )
            .await?;

        if !is_unique_verdict(&verdict) {
            let verdict = match verdict.trim() {
                "" => "no details given",
                feedback => feedback,
            };
            tracing::warn!(feedback = %verdict, "candidate collides with history, regenerating once");

            let refocus = self
                .call(
                    "refocusing after a collision",
                    FOCUS_SYSTEM,
                    format!(
                        "Write a fresh, specific brief for {subject}. A previous attempt was \
                         rejected as too similar to earlier output: {verdict}\nSteer clearly away from that."
                    ),
                    self.settings.focus_temperature,
                )
                .await?;

            candidate = self
                .call(
                    "regenerating a candidate",
                    CANDIDATE_SYSTEM,
                    refocus,
                    self.settings.candidate_temperature,
                )
                .await?;
        }

        let evicted = self.history.push(candidate.clone()).await;
        tracing::debug!(evicted, "generation recorded");
        Ok(candidate)
    }

    /// One non-streaming provider call; returns the trimmed answer text.
    /// Blank output is a failure.
    async fn call(
        &self,
        stage: &'static str,
        system: &str,
        prompt: String,
        temperature: f64,
    ) -> Result<String, SwitchboardError> {
        let text = self.call_raw(stage, system, prompt, temperature).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SwitchboardError::generation(
                stage,
                SwitchboardError::Other("provider returned no text".to_string()),
            ));
        }
        Ok(text.to_string())
    }

    /// Like `call`, but any answer text is accepted, including none.
    async fn call_raw(
        &self,
        stage: &'static str,
        system: &str,
        prompt: String,
        temperature: f64,
    ) -> Result<String, SwitchboardError> {
        let req = ProviderRequest {
            model: self.model.clone(),
            system: system.to_string(),
            messages: vec![Message::user_text(prompt)],
            temperature,
            max_output_tokens: self.settings.max_output_tokens,
            cancellation_token: CancellationToken::new(),
        };
        let stream = self.provider.stream_generate(req);

        let result = match self.settings.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, collect_answer(stream)).await {
                Ok(r) => r,
                Err(_) => Err(SwitchboardError::Timeout(limit.as_millis() as u64)),
            },
            None => collect_answer(stream).await,
        };

        result.map_err(|e| SwitchboardError::generation(stage, e))
    }
}

/// Build the judge prompt: recent history oldest-first, then the candidate.
pub fn judge_prompt(recent: &[String], candidate: &str) -> String {
    let previous = if recent.is_empty() {
        "(none)".to_string()
    } else {
        recent.join(HISTORY_DELIMITER)
    };
    format!("Previous texts:\n{previous}\n\nNew text:\n{candidate}")
}

/// Only the bare sentinel counts; anything else is collision feedback.
pub fn is_unique_verdict(verdict: &str) -> bool {
    verdict
        .trim()
        .trim_end_matches(['.', '!'])
        .eq_ignore_ascii_case(UNIQUE_SENTINEL)
}
