//! Messaging channel access.
//!
//! Evidence photos arrive as bot messages. The supervisor only reads:
//! today's messages and the binary content of their attachments.

mod telegram;

pub use telegram::TelegramClient;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("messaging API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("messaging API rejected the request: {0}")]
    Api(String),

    #[error("messaging request failed: {0}")]
    Network(String),

    #[error("failed to parse messaging response: {0}")]
    Parse(String),
}

/// How an attachment was sent.
///
/// Documents keep the original file (and its EXIF block); photos are
/// recompressed by the channel and usually lose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Document,
    Photo,
}

/// Reference to a downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_id: String,
    pub file_name: Option<String>,
    pub kind: AttachmentKind,
}

/// A received message.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub sent_at: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Whether the message was sent on `day` in `offset`.
    pub fn sent_on(&self, day: NaiveDate, offset: FixedOffset) -> bool {
        self.sent_at.with_timezone(&offset).date_naive() == day
    }

    /// Whether the caption (or text) contains `marker`, case-insensitively.
    pub fn is_tagged(&self, marker: &str) -> bool {
        let marker = marker.to_lowercase();
        [self.caption.as_deref(), self.text.as_deref()]
            .into_iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(&marker))
    }
}

/// Read-only access to the bot's messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Messages sent on `day` (in `offset`), in arrival order.
    async fn messages_on(
        &self,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Vec<Message>, MessagingError>;

    /// Download the binary content of an attachment.
    async fn download(&self, attachment: &Attachment) -> Result<Bytes, MessagingError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;

    use super::*;

    /// In-memory channel; files are keyed by `file_id`.
    #[derive(Default)]
    pub struct FakeChannel {
        pub messages: Vec<Message>,
        pub files: HashMap<String, Bytes>,
        pub offline: bool,
    }

    impl FakeChannel {
        pub fn push(
            &mut self,
            sent_at: DateTime<Utc>,
            caption: Option<&str>,
            file_id: &str,
            content: Vec<u8>,
        ) {
            let id = self.messages.len() as i64 + 1;
            self.messages.push(Message {
                id,
                sent_at,
                text: None,
                caption: caption.map(str::to_string),
                attachment: Some(Attachment {
                    file_id: file_id.to_string(),
                    file_name: Some(format!("{}.jpg", file_id)),
                    kind: AttachmentKind::Document,
                }),
            });
            self.files.insert(file_id.to_string(), Bytes::from(content));
        }
    }

    #[async_trait]
    impl MessageSource for FakeChannel {
        async fn messages_on(
            &self,
            day: NaiveDate,
            offset: FixedOffset,
        ) -> Result<Vec<Message>, MessagingError> {
            if self.offline {
                return Err(MessagingError::Network("timed out".to_string()));
            }
            Ok(self
                .messages
                .iter()
                .filter(|m| m.sent_on(day, offset))
                .cloned()
                .collect())
        }

        async fn download(&self, attachment: &Attachment) -> Result<Bytes, MessagingError> {
            self.files
                .get(&attachment.file_id)
                .cloned()
                .ok_or_else(|| MessagingError::Api(format!("file {} not found", attachment.file_id)))
        }
    }
}
