//! Data model shared by every pipeline stage.
//!
//! [`StructuredContent`] is the one value that flows through the whole
//! pipeline. Each stage takes it by reference and hands back a new value
//! rather than mutating a shared copy, so per-block image workers never need
//! to coordinate access to it.
//!
//! The serde representation of [`StructuredContent`] is the snapshot format
//! persisted between stages: `{"title", "author", "content": [{"type", "data"}]}`
//! with an optional `"image"` object on resolved `image_prompt` blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ── Manuscript ───────────────────────────────────────────────────────────

/// Identifier of a stored manuscript. Every artifact the pipeline persists is
/// scoped to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManuscriptId(Uuid);

impl ManuscriptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ManuscriptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ManuscriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for ManuscriptId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A manuscript as submitted by the caller, before it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewManuscript {
    pub title: String,
    pub author: String,
    pub text: String,
}

impl NewManuscript {
    pub fn new(title: impl Into<String>, author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            text: text.into(),
        }
    }
}

/// A durable manuscript record. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: ManuscriptId,
    pub title: String,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ── Structured content ───────────────────────────────────────────────────

/// Reference to a persisted image artifact.
///
/// `key` is the storage key (a path relative to the storage root for
/// [`crate::storage::FsStorage`]); `id` is unique per manuscript and never
/// shared between two blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub id: String,
    pub key: String,
    /// Prompt the image was produced for (or substituted for, in test mode).
    pub prompt: String,
}

/// One unit of structured manuscript content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// A run of manuscript text. Line breaks inside `data` are kept as line
    /// breaks within a single paragraph.
    Text { data: String },
    /// An illustration placeholder carrying the generation prompt.
    ImagePrompt {
        data: String,
        #[serde(default, rename = "image", skip_serializing_if = "Option::is_none")]
        resolved_image: Option<ImageHandle>,
    },
}

impl ContentBlock {
    pub fn text(data: impl Into<String>) -> Self {
        ContentBlock::Text { data: data.into() }
    }

    pub fn image_prompt(data: impl Into<String>) -> Self {
        ContentBlock::ImagePrompt {
            data: data.into(),
            resolved_image: None,
        }
    }

    pub fn data(&self) -> &str {
        match self {
            ContentBlock::Text { data } | ContentBlock::ImagePrompt { data, .. } => data,
        }
    }

    pub fn is_image_prompt(&self) -> bool {
        matches!(self, ContentBlock::ImagePrompt { .. })
    }

    pub fn resolved_image(&self) -> Option<&ImageHandle> {
        match self {
            ContentBlock::ImagePrompt { resolved_image, .. } => resolved_image.as_ref(),
            ContentBlock::Text { .. } => None,
        }
    }
}

/// Title, author and the ordered block sequence of a book.
///
/// Block order is the pagination order and is never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredContent {
    pub title: String,
    pub author: String,
    #[serde(rename = "content")]
    pub blocks: Vec<ContentBlock>,
}

impl StructuredContent {
    /// Number of `image_prompt` blocks.
    pub fn image_prompt_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_image_prompt()).count()
    }

    /// Prompts of all `image_prompt` blocks as `(block_index, prompt)`, in order.
    pub fn image_prompts(&self) -> Vec<(usize, &str)> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_image_prompt())
            .map(|(i, b)| (i, b.data()))
            .collect()
    }

    /// Return a copy with `resolved` attached to the given block indices.
    ///
    /// Indices that do not point at an `image_prompt` block are ignored; a
    /// `None` entry leaves the block unresolved.
    pub fn with_resolved_images(&self, resolved: &[(usize, Option<ImageHandle>)]) -> Self {
        let mut next = self.clone();
        for (index, handle) in resolved {
            if let Some(ContentBlock::ImagePrompt { resolved_image, .. }) = next.blocks.get_mut(*index) {
                *resolved_image = handle.clone();
            }
        }
        next
    }

    /// Serialise as the persisted snapshot: indented, non-ASCII kept verbatim.
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_snapshot(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── Pipeline run ─────────────────────────────────────────────────────────

/// Stages of one pipeline run. Transitions are strictly linear; `Failed` is
/// reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Received,
    Structuring,
    ImageResolving,
    Rendering,
    Persisted,
    Delivered,
    Failed,
}

impl RunStage {
    /// The stage that follows `self` on the success path.
    pub fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Received => Some(RunStage::Structuring),
            RunStage::Structuring => Some(RunStage::ImageResolving),
            RunStage::ImageResolving => Some(RunStage::Rendering),
            RunStage::Rendering => Some(RunStage::Persisted),
            RunStage::Persisted => Some(RunStage::Delivered),
            RunStage::Delivered | RunStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Delivered | RunStage::Failed)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Received => "received",
            RunStage::Structuring => "structuring",
            RunStage::ImageResolving => "image_resolving",
            RunStage::Rendering => "rendering",
            RunStage::Persisted => "persisted",
            RunStage::Delivered => "delivered",
            RunStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counts reported after image resolution. Unresolved blocks are an expected
/// outcome, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub resolved: usize,
    pub unresolved: usize,
}

/// Ephemeral aggregate tracking one manuscript through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub manuscript_id: ManuscriptId,
    stage: RunStage,
    pub content: Option<StructuredContent>,
    pub images: Vec<ImageHandle>,
    pub pdf: Option<Vec<u8>>,
}

impl PipelineRun {
    pub fn new(manuscript_id: ManuscriptId) -> Self {
        Self {
            manuscript_id,
            stage: RunStage::Received,
            content: None,
            images: Vec::new(),
            pdf: None,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Move to the next stage on the success path.
    ///
    /// Returns the new stage, or `None` if the run is already terminal.
    pub fn advance(&mut self) -> Option<RunStage> {
        let next = self.stage.next()?;
        self.stage = next;
        Some(next)
    }

    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = RunStage::Failed;
        }
    }
}

/// The final artifact handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredBook {
    pub manuscript_id: ManuscriptId,
    /// Download file name, e.g. `generated_book_<id>.pdf`.
    pub filename: String,
    pub pdf: Vec<u8>,
    pub summary: ResolutionSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StructuredContent {
        StructuredContent {
            title: "T".into(),
            author: "Au".into(),
            blocks: vec![
                ContentBlock::text("Once upon a time."),
                ContentBlock::image_prompt("a dog running"),
                ContentBlock::text("The end."),
            ],
        }
    }

    #[test]
    fn parses_upstream_schema() {
        let json = r#"{"title":"T","author":"Au","content":[{"type":"text","data":"a"},{"type":"image_prompt","data":"b"}]}"#;
        let content: StructuredContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.blocks[0], ContentBlock::text("a"));
        assert_eq!(content.blocks[1], ContentBlock::image_prompt("b"));
    }

    #[test]
    fn snapshot_keeps_non_ascii_verbatim() {
        let content = StructuredContent {
            title: "Книга".into(),
            author: "Автор".into(),
            blocks: vec![ContentBlock::text("Жили-были")],
        };
        let snap = content.to_snapshot().unwrap();
        assert!(snap.contains("Книга"));
        assert!(snap.contains("Жили-были"));
        assert!(!snap.contains("\\u"));
        assert!(snap.contains('\n'), "snapshot should be indented");
    }

    #[test]
    fn unresolved_prompt_omits_image_field() {
        let snap = sample().to_snapshot().unwrap();
        assert!(!snap.contains("\"image\""));
    }

    #[test]
    fn with_resolved_images_returns_new_value() {
        let content = sample();
        let handle = ImageHandle {
            id: "x_1".into(),
            key: "books/x/images/x_1.png".into(),
            prompt: "a dog running".into(),
        };
        let resolved = content.with_resolved_images(&[(1, Some(handle.clone())), (0, Some(handle.clone()))]);

        assert_eq!(content.blocks[1].resolved_image(), None);
        assert_eq!(resolved.blocks[1].resolved_image(), Some(&handle));
        // Text blocks never take an image.
        assert_eq!(resolved.blocks[0].resolved_image(), None);

        let back = StructuredContent::from_snapshot(&resolved.to_snapshot().unwrap()).unwrap();
        assert_eq!(back, resolved);
    }

    #[test]
    fn run_stages_are_linear() {
        let mut run = PipelineRun::new(ManuscriptId::new());
        let mut seen = vec![run.stage()];
        while let Some(stage) = run.advance() {
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                RunStage::Received,
                RunStage::Structuring,
                RunStage::ImageResolving,
                RunStage::Rendering,
                RunStage::Persisted,
                RunStage::Delivered,
            ]
        );
        run.fail();
        assert_eq!(run.stage(), RunStage::Delivered, "terminal stages are sticky");
    }

    #[test]
    fn failed_is_reachable_from_any_stage() {
        let mut run = PipelineRun::new(ManuscriptId::new());
        run.advance();
        run.fail();
        assert_eq!(run.stage(), RunStage::Failed);
        assert_eq!(run.advance(), None);
    }

    #[test]
    fn manuscript_id_round_trips_through_display() {
        let id = ManuscriptId::new();
        let parsed: ManuscriptId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
