//! Task tree extraction.
//!
//! Walks a day's toggle section recursively and produces a uniform pass/fail
//! tree. Nested toggles become branches keyed by their cleaned header text,
//! to-do items become leaves, and free-text lines are collected per level.

use std::collections::HashMap;

use async_recursion::async_recursion;
use chrono::NaiveDate;

use super::{BlockKind, NoteSource, NotesError};
use crate::util::{day_label, month_key};
use crate::verify::Outcome;

/// Glyphs used as status markers in headers and item labels.
pub const STATUS_MARKERS: [char; 3] = ['✅', '❌', '⌛'];

/// Marker that flags an empty section as done.
pub const DONE_MARKER: char = '✅';

/// One node of the extracted outline.
///
/// # Invariants
/// - A node is exactly one of `Leaf` or `Branch`.
/// - Branch keys are unique and contain no status markers.
/// - A branch is never empty; an empty section degrades to a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskNode {
    Leaf {
        result: Outcome,
        evidence_text: String,
    },
    Branch {
        /// Children in document order
        children: Vec<(String, TaskNode)>,
        evidence_text: String,
    },
}

impl TaskNode {
    pub fn leaf(result: Outcome) -> Self {
        TaskNode::Leaf {
            result,
            evidence_text: String::new(),
        }
    }

    /// Build a branch from entries; a repeated key keeps its first position
    /// and takes the later value.
    pub fn branch(entries: Vec<(String, TaskNode)>, evidence_text: String) -> Self {
        let mut children: Vec<(String, TaskNode)> = Vec::with_capacity(entries.len());
        for (key, node) in entries {
            match children.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = node,
                None => children.push((key, node)),
            }
        }
        TaskNode::Branch {
            children,
            evidence_text,
        }
    }

    /// Look up a direct child of a branch.
    pub fn child(&self, key: &str) -> Option<&TaskNode> {
        match self {
            TaskNode::Branch { children, .. } => {
                children.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            TaskNode::Leaf { .. } => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TaskNode::Leaf { .. })
    }

    pub fn result(&self) -> Option<Outcome> {
        match self {
            TaskNode::Leaf { result, .. } => Some(*result),
            TaskNode::Branch { .. } => None,
        }
    }

    pub fn evidence_text(&self) -> &str {
        match self {
            TaskNode::Leaf { evidence_text, .. } | TaskNode::Branch { evidence_text, .. } => {
                evidence_text
            }
        }
    }

    /// Paths (`/a/b/c`) of every failing leaf below this node, in document order.
    ///
    /// A failing root leaf has no key of its own and reports as `/`.
    pub fn failed_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            TaskNode::Leaf {
                result: Outcome::Fail,
                ..
            } => out.push("/".to_string()),
            TaskNode::Leaf { .. } => {}
            TaskNode::Branch { .. } => self.collect_failures("", &mut out),
        }
        out
    }

    fn collect_failures(&self, prefix: &str, out: &mut Vec<String>) {
        if let TaskNode::Branch { children, .. } = self {
            for (key, node) in children {
                let path = format!("{}/{}", prefix, key);
                match node {
                    TaskNode::Leaf {
                        result: Outcome::Fail,
                        ..
                    } => out.push(path),
                    TaskNode::Leaf { .. } => {}
                    TaskNode::Branch { .. } => node.collect_failures(&path, out),
                }
            }
        }
    }
}

/// Strip status markers and surrounding whitespace from a label.
pub fn clean_marker_text(text: &str) -> String {
    text.chars()
        .filter(|c| !STATUS_MARKERS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extract the task tree of `today` from the outline.
///
/// Returns `Ok(None)` when the month page has no section for `today`.
pub async fn extract_today(
    source: &dyn NoteSource,
    page_ids: &HashMap<String, String>,
    today: NaiveDate,
) -> Result<Option<TaskNode>, NotesError> {
    let month = month_key(today);
    let page_id = page_ids
        .get(&month)
        .ok_or_else(|| NotesError::PageNotConfigured(month.clone()))?;

    let label = day_label(today);
    let sections = source.list_children(page_id).await?;
    let today_section = sections.into_iter().find(|block| match &block.kind {
        BlockKind::Toggle { text } => text.trim() == label,
        _ => false,
    });

    let Some(section) = today_section else {
        tracing::debug!(day = %label, "No section for today in outline");
        return Ok(None);
    };

    let header = match &section.kind {
        BlockKind::Toggle { text } => text.clone(),
        _ => String::new(),
    };
    let tree = parse_section(source, &section.id, &header).await?;
    Ok(Some(tree))
}

#[async_recursion]
async fn parse_section(
    source: &dyn NoteSource,
    block_id: &str,
    header: &str,
) -> Result<TaskNode, NotesError> {
    let children = source.list_children(block_id).await?;

    let mut entries = Vec::new();
    let mut lines = Vec::new();

    for child in children {
        match child.kind {
            BlockKind::Toggle { text } => {
                let node = parse_section(source, &child.id, &text).await?;
                entries.push((clean_marker_text(&text), node));
            }
            BlockKind::ToDo { text, checked } => {
                entries.push((clean_marker_text(&text), TaskNode::leaf(Outcome::from_bool(checked))));
            }
            BlockKind::Text { text } => {
                if !text.trim().is_empty() {
                    lines.push(text);
                }
            }
            BlockKind::Unsupported(kind) => {
                tracing::trace!(block = %child.id, kind = %kind, "Skipping unsupported block");
            }
        }
    }

    let evidence_text = lines.join("\n");
    if entries.is_empty() {
        return Ok(TaskNode::Leaf {
            result: Outcome::from_bool(header.contains(DONE_MARKER)),
            evidence_text,
        });
    }
    Ok(TaskNode::branch(entries, evidence_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::fake::FakeNotes;
    use crate::notes::Block;

    fn pages() -> HashMap<String, String> {
        HashMap::from([("05/2025".to_string(), "page-may".to_string())])
    }

    fn may_21() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 21).unwrap()
    }

    #[test]
    fn clean_marker_text_strips_glyphs() {
        assert_eq!(clean_marker_text("✅ việc linh tinh "), "việc linh tinh");
        assert_eq!(clean_marker_text("⌛read ❌"), "read");
        assert_eq!(clean_marker_text("plain"), "plain");
    }

    #[tokio::test]
    async fn extracts_nested_tree() {
        let notes = FakeNotes::default()
            .with(
                "page-may",
                vec![
                    Block::toggle("d20", "20/05/2025"),
                    Block::toggle("d21", "21/05/2025"),
                ],
            )
            .with(
                "d21",
                vec![
                    Block::to_do("t1", "note đầu ngày ✅", true),
                    Block::toggle("misc", "✅ việc linh tinh"),
                    Block::text("p1", "slept late"),
                    Block::text("p2", "   "),
                    Block::text("p3", "woke at 7"),
                ],
            )
            .with(
                "misc",
                vec![
                    Block::to_do("m1", "no any fucking porn", true),
                    Block::to_do("m2", "follow pomodoro strictly", false),
                ],
            );

        let tree = extract_today(&notes, &pages(), may_21()).await.unwrap().unwrap();

        assert_eq!(tree.evidence_text(), "slept late\nwoke at 7");
        assert_eq!(tree.child("note đầu ngày").and_then(TaskNode::result), Some(Outcome::Pass));
        let misc = tree.child("việc linh tinh").unwrap();
        assert!(!misc.is_leaf());
        assert_eq!(
            misc.child("follow pomodoro strictly").and_then(TaskNode::result),
            Some(Outcome::Fail)
        );
    }

    #[tokio::test]
    async fn empty_section_uses_header_marker() {
        let notes = FakeNotes::default()
            .with("page-may", vec![Block::toggle("d21", "21/05/2025")])
            .with(
                "d21",
                vec![
                    Block::toggle("gym", "gym ✅"),
                    Block::toggle("read", "read ⌛"),
                ],
            )
            .with("read", vec![Block::text("r1", "chapter 3")]);

        let tree = extract_today(&notes, &pages(), may_21()).await.unwrap().unwrap();

        assert_eq!(tree.child("gym").and_then(TaskNode::result), Some(Outcome::Pass));
        let read = tree.child("read").unwrap();
        assert_eq!(read.result(), Some(Outcome::Fail));
        assert_eq!(read.evidence_text(), "chapter 3");
    }

    #[tokio::test]
    async fn missing_section_is_none() {
        let notes = FakeNotes::default().with("page-may", vec![Block::toggle("d20", "20/05/2025")]);
        let tree = extract_today(&notes, &pages(), may_21()).await.unwrap();
        assert!(tree.is_none());
    }

    #[tokio::test]
    async fn unconfigured_month_is_an_error() {
        let notes = FakeNotes::default();
        let june = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let err = extract_today(&notes, &pages(), june).await.unwrap_err();
        assert!(matches!(err, NotesError::PageNotConfigured(m) if m == "06/2025"));
    }

    #[test]
    fn duplicate_keys_keep_first_position_and_last_value() {
        let tree = TaskNode::branch(
            vec![
                ("a".to_string(), TaskNode::leaf(Outcome::Fail)),
                ("b".to_string(), TaskNode::leaf(Outcome::Pass)),
                ("a".to_string(), TaskNode::leaf(Outcome::Pass)),
            ],
            String::new(),
        );
        match &tree {
            TaskNode::Branch { children, .. } => {
                let keys: Vec<&str> = children.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b"]);
            }
            TaskNode::Leaf { .. } => panic!("expected branch"),
        }
        assert!(tree.failed_paths().is_empty());
    }

    #[test]
    fn failed_paths_are_path_qualified() {
        let tree = TaskNode::branch(
            vec![
                ("ok".to_string(), TaskNode::leaf(Outcome::Pass)),
                (
                    "sectionA".to_string(),
                    TaskNode::branch(
                        vec![(
                            "sectionB".to_string(),
                            TaskNode::branch(
                                vec![
                                    ("itemC".to_string(), TaskNode::leaf(Outcome::Fail)),
                                    ("itemD".to_string(), TaskNode::leaf(Outcome::Pass)),
                                ],
                                String::new(),
                            ),
                        )],
                        String::new(),
                    ),
                ),
                ("top".to_string(), TaskNode::leaf(Outcome::Fail)),
            ],
            String::new(),
        );
        assert_eq!(tree.failed_paths(), vec!["/sectionA/sectionB/itemC", "/top"]);
    }
}
