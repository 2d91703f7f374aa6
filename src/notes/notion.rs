//! Notion REST client for the outline document.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Block, BlockKind, NoteSource, NotesError};

const NOTION_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Read-only Notion client.
pub struct NotionClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl NotionClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: NOTION_API_URL.to_string(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
        block_id: &str,
    ) -> Result<T, NotesError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .query(query)
            .send()
            .await
            .map_err(|e| NotesError::Network(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(NotesError::NotFound(block_id.to_string()));
        }
        if !status.is_success() {
            return Err(NotesError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| NotesError::Parse(e.to_string()))
    }
}

#[async_trait]
impl NoteSource for NotionClient {
    async fn list_children(&self, block_id: &str) -> Result<Vec<Block>, NotesError> {
        let url = format!("{}/blocks/{}/children", self.base_url, block_id);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(ref c) = cursor {
                query.push(("start_cursor", c.clone()));
            }
            let page: ChildrenPage = self.get(&url, &query, block_id).await?;
            blocks.extend(page.results.into_iter().map(Block::from));

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        tracing::trace!(block = %block_id, count = blocks.len(), "Listed outline children");
        Ok(blocks)
    }

    async fn retrieve_block(&self, block_id: &str) -> Result<Block, NotesError> {
        let url = format!("{}/blocks/{}", self.base_url, block_id);
        let raw: RawBlock = self.get(&url, &[], block_id).await?;
        Ok(raw.into())
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    results: Vec<RawBlock>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    id: String,
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    toggle: Option<RichTextBody>,
    #[serde(default)]
    to_do: Option<ToDoBody>,
    #[serde(default)]
    paragraph: Option<RichTextBody>,
    #[serde(default)]
    bulleted_list_item: Option<RichTextBody>,
    #[serde(default)]
    numbered_list_item: Option<RichTextBody>,
    #[serde(default)]
    quote: Option<RichTextBody>,
}

#[derive(Debug, Deserialize)]
struct RichTextBody {
    #[serde(default)]
    rich_text: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
struct ToDoBody {
    #[serde(default)]
    rich_text: Vec<RichText>,
    #[serde(default)]
    checked: bool,
}

#[derive(Debug, Deserialize)]
struct RichText {
    #[serde(default)]
    plain_text: String,
}

fn plain_text(parts: &[RichText]) -> String {
    parts.iter().map(|p| p.plain_text.as_str()).collect()
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        let kind = match raw.block_type.as_str() {
            "toggle" => BlockKind::Toggle {
                text: raw.toggle.map(|b| plain_text(&b.rich_text)).unwrap_or_default(),
            },
            "to_do" => {
                let body = raw.to_do.unwrap_or(ToDoBody {
                    rich_text: Vec::new(),
                    checked: false,
                });
                BlockKind::ToDo {
                    text: plain_text(&body.rich_text),
                    checked: body.checked,
                }
            }
            "paragraph" | "bulleted_list_item" | "numbered_list_item" | "quote" => {
                let body = raw
                    .paragraph
                    .or(raw.bulleted_list_item)
                    .or(raw.numbered_list_item)
                    .or(raw.quote);
                BlockKind::Text {
                    text: body.map(|b| plain_text(&b.rich_text)).unwrap_or_default(),
                }
            }
            other => BlockKind::Unsupported(other.to_string()),
        };
        Block { id: raw.id, kind }
    }
}
