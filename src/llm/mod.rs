//! Inference client for vision-capable language models.
//!
//! The supervisor treats the model as a stateless text oracle: one system
//! instruction, one user instruction, zero or more images in, free-form text
//! out. Callers decide whether that text is a boolean, JSON-ish or prose.

mod error;
mod openrouter;

pub use error::{LlmError, RetryConfig};
pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Content part for multimodal messages (text or image).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message content - either simple text or multimodal (text + images).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }
}

/// An image handed to the model.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: bytes::Bytes,
    pub mime_type: String,
}

impl ImageInput {
    pub fn from_bytes(bytes: bytes::Bytes) -> Self {
        let mime_type = sniff_mime(&bytes).to_string();
        Self { bytes, mime_type }
    }

    /// Inline `data:` URL accepted by OpenAI-compatible vision endpoints.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// One inference call.
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub system: Option<String>,
    pub user: String,
    pub images: Vec<ImageInput>,
}

impl InferenceRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.images.push(image);
        self
    }

    /// Render as chat messages: optional system turn, then one user turn
    /// carrying the instruction followed by the images.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = self.system {
            messages.push(ChatMessage::new(Role::System, system.clone()));
        }
        let content = if self.images.is_empty() {
            MessageContent::Text(self.user.clone())
        } else {
            let mut parts = vec![ContentPart::Text {
                text: self.user.clone(),
            }];
            parts.extend(self.images.iter().map(|img| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: img.data_url(),
                },
            }));
            MessageContent::Parts(parts)
        };
        messages.push(ChatMessage {
            role: Role::User,
            content,
        });
        messages
    }
}

/// Stateless request/response inference.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays scripted answers and records each request's user text and image count.
    #[derive(Default)]
    pub struct ScriptedModel {
        pub answers: Mutex<VecDeque<anyhow::Result<String>>>,
        pub seen: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedModel {
        pub fn answering(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|a| Ok(a.to_string())).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedModel {
        async fn complete(&self, request: &InferenceRequest) -> anyhow::Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((request.user.clone(), request.images.len()));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted answer left")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_renders_system_then_multimodal_user() {
        let request = InferenceRequest::new("is this a toothbrush?")
            .with_system("answer true or false")
            .with_image(ImageInput::from_bytes(bytes::Bytes::from_static(&[0xFF, 0xD8, 0xFF])));

        let messages = request.to_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);

        let json = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        let url = json["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn text_only_request_has_plain_content() {
        let messages = InferenceRequest::new("hello").to_messages();
        assert_eq!(messages.len(), 1);
        let json = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn sniffs_png() {
        let png = ImageInput::from_bytes(bytes::Bytes::from_static(b"\x89PNG\r\n\x1a\n"));
        assert_eq!(png.mime_type, "image/png");
    }
}
