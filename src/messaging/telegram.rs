//! Telegram Bot API client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{Attachment, AttachmentKind, Message, MessageSource, MessagingError};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramClient {
    client: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, MessagingError> {
        let url = format!("{}/bot{}/{}", TELEGRAM_API_URL, self.token, method);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| MessagingError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MessagingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| MessagingError::Parse(e.to_string()))?;
        match (envelope.ok, envelope.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(MessagingError::Api(
                envelope
                    .description
                    .unwrap_or_else(|| format!("{} returned no result", method)),
            )),
        }
    }
}

#[async_trait]
impl MessageSource for TelegramClient {
    async fn messages_on(
        &self,
        day: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Vec<Message>, MessagingError> {
        let mut updates: Vec<Update> = self.call("getUpdates", &[]).await?;
        updates.sort_by_key(|u| u.update_id);

        let messages: Vec<Message> = updates
            .into_iter()
            .filter_map(|u| u.message)
            .filter_map(RawMessage::into_message)
            .filter(|m| m.sent_on(day, offset))
            .collect();

        tracing::debug!(count = messages.len(), day = %day, "Fetched today's messages");
        Ok(messages)
    }

    async fn download(&self, attachment: &Attachment) -> Result<Bytes, MessagingError> {
        let file: RemoteFile = self
            .call("getFile", &[("file_id", attachment.file_id.clone())])
            .await?;
        let path = file.file_path.ok_or_else(|| {
            MessagingError::Api(format!("file {} has no download path", attachment.file_id))
        })?;

        let url = format!("{}/file/bot{}/{}", TELEGRAM_API_URL, self.token, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MessagingError::Network(e.without_url().to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MessagingError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response
            .bytes()
            .await
            .map_err(|e| MessagingError::Network(e.without_url().to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i64,
    /// Unix seconds
    date: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    #[serde(default)]
    file_path: Option<String>,
}

impl RawMessage {
    fn into_message(self) -> Option<Message> {
        let sent_at = DateTime::<Utc>::from_timestamp(self.date, 0)?;

        let attachment = if let Some(doc) = self.document {
            Some(Attachment {
                file_id: doc.file_id,
                file_name: doc.file_name,
                kind: AttachmentKind::Document,
            })
        } else {
            self.photo.and_then(|sizes| {
                sizes
                    .into_iter()
                    .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
                    .map(|p| Attachment {
                        file_id: p.file_id,
                        file_name: None,
                        kind: AttachmentKind::Photo,
                    })
            })
        };

        Some(Message {
            id: self.message_id,
            sent_at,
            text: self.text,
            caption: self.caption,
            attachment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updates_with_documents_and_photos() {
        let body = r##"{
            "ok": true,
            "result": [
                {"update_id": 11, "message": {"message_id": 2, "date": 1747792800,
                  "caption": "#workout",
                  "photo": [
                    {"file_id": "small", "width": 90, "height": 90},
                    {"file_id": "large", "width": 1280, "height": 960}
                  ]}},
                {"update_id": 10, "message": {"message_id": 1, "date": 1747789200,
                  "document": {"file_id": "doc1", "file_name": "IMG_1.jpg"}}},
                {"update_id": 12}
            ]
        }"##;
        let envelope: Envelope<Vec<Update>> = serde_json::from_str(body).unwrap();
        let messages: Vec<Message> = envelope
            .result
            .unwrap()
            .into_iter()
            .filter_map(|u| u.message)
            .filter_map(RawMessage::into_message)
            .collect();

        assert_eq!(messages.len(), 2);
        let photo = messages[0].attachment.as_ref().unwrap();
        assert_eq!(photo.file_id, "large");
        assert_eq!(photo.kind, AttachmentKind::Photo);
        let doc = messages[1].attachment.as_ref().unwrap();
        assert_eq!(doc.kind, AttachmentKind::Document);
        assert_eq!(doc.file_name.as_deref(), Some("IMG_1.jpg"));
    }

    #[test]
    fn failed_envelope_carries_description() {
        let body = r#"{"ok": false, "description": "Unauthorized"}"#;
        let envelope: Envelope<Vec<Update>> = serde_json::from_str(body).unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.description.as_deref(), Some("Unauthorized"));
        assert!(envelope.result.is_none());
    }
}
