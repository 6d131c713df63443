use serde::{Deserialize, Serialize};

use crate::error::SwitchboardError;

/// Maximum number of conversation entries accepted per chat request.
pub const MAX_MESSAGES: usize = 200;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    /// Catalog model id. Absent or unknown ids fall back to the default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Caller-supplied system prompt. Blank means "ask the prompt service".
    #[serde(default)]
    pub system: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A stored conversation entry as the client sends it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// Stored content is either a bare string or an ordered list of parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Reference to an uploaded file. The bytes live elsewhere.
    Attachment {
        url: String,
        #[serde(default, alias = "contentType")]
        media_type: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Provider-neutral message handed to a `Provider`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    User { parts: Vec<Part> },
    Assistant { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Attachment {
        url: String,
        media_type: Option<String>,
        name: Option<String>,
    },
}

impl Part {
    pub fn is_image(&self) -> bool {
        matches!(self, Part::Attachment { media_type: Some(mt), .. } if mt.starts_with("image/"))
    }
}

impl Message {
    /// Shorthand for a single-text user turn, used by internal pipelines.
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Plain-text rendering, with attachments shown as references.
    pub fn flatten_text(&self) -> String {
        match self {
            Message::Assistant { text } => text.clone(),
            Message::User { parts } => parts
                .iter()
                .map(|p| match p {
                    Part::Text(t) => t.clone(),
                    Part::Attachment { url, name, .. } => {
                        format!("[attachment: {}]", name.as_deref().unwrap_or(url))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Convert stored conversation entries into provider-neutral messages.
///
/// Order is preserved exactly. User parts keep their original interleaving;
/// assistant turns collapse to their text. An empty list, an oversized list,
/// or an entry with no usable content is rejected before any stream opens.
pub fn normalize(messages: &[ConversationMessage]) -> Result<Vec<Message>, SwitchboardError> {
    if messages.is_empty() {
        return Err(SwitchboardError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    if messages.len() > MAX_MESSAGES {
        return Err(SwitchboardError::InvalidRequest(format!(
            "too many messages: {} (max {MAX_MESSAGES})",
            messages.len()
        )));
    }

    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| normalize_one(i, msg))
        .collect()
}

fn normalize_one(index: usize, msg: &ConversationMessage) -> Result<Message, SwitchboardError> {
    let parts = match &msg.content {
        MessageContent::Text(text) => vec![Part::Text(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => Ok(Part::Text(text.clone())),
                ContentPart::Attachment {
                    url,
                    media_type,
                    name,
                } => {
                    if url.trim().is_empty() {
                        return Err(SwitchboardError::InvalidRequest(format!(
                            "message {index}: attachment has an empty url"
                        )));
                    }
                    Ok(Part::Attachment {
                        url: url.clone(),
                        media_type: media_type.clone(),
                        name: name.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    let has_content = parts.iter().any(|p| match p {
        Part::Text(t) => !t.trim().is_empty(),
        Part::Attachment { .. } => true,
    });
    if !has_content {
        return Err(SwitchboardError::InvalidRequest(format!(
            "message {index} has no content"
        )));
    }

    Ok(match msg.role {
        Role::User => Message::User { parts },
        Role::Assistant => Message::Assistant {
            text: parts
                .into_iter()
                .filter_map(|p| match p {
                    Part::Text(t) => Some(t),
                    Part::Attachment { .. } => None,
                })
                .collect(),
        },
    })
}
