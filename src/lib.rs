//! # book-illustrator
//!
//! Turn a plain-text manuscript into an illustrated PDF book.
//!
//! A text model splits the manuscript into narrative paragraphs and
//! illustration placeholders. Each placeholder is then resolved to an image,
//! either generated from its prompt or taken from a local pool in test mode.
//! Finally the book is laid out as a deterministic PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! manuscript
//!  │
//!  ├─ 1. Structure  text model → JSON content blocks (ordered model fallback)
//!  ├─ 2. Images     image models per placeholder, or cyclic test pool
//!  ├─ 3. Render     title page + paragraphs + images (pdf-writer, spawn_blocking)
//!  └─ 4. Persist    snapshot after each stage, PDF copied from scratch
//! ```
//!
//! Model calls go through ordered candidate lists. A candidate that is rate
//! limited pauses every pending call for the configured back-off before the
//! next candidate is tried. Placeholders whose candidates all fail are left
//! out of the book; the run still succeeds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use book_illustrator::{NewManuscript, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().test_mode(true).build()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!     let book = pipeline
//!         .submit(NewManuscript::new("The Fox", "Anon", "Once upon a time..."))
//!         .await?;
//!     std::fs::write(&book.filename, &book.pdf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `illustrate` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImageMode, PipelineConfig, PipelineConfigBuilder};
pub use error::{CandidateError, CandidateFailure, ErrorBody, PipelineError};
pub use model::{
    ContentBlock, DeliveredBook, ImageHandle, Manuscript, ManuscriptId, NewManuscript, PipelineRun,
    ResolutionSummary, RunStage, StructuredContent,
};
pub use orchestrator::{render_stored, Pipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use providers::{GeminiImageGenerator, ImageGenerator, ImagePayload, LlmTextGenerator, TextGenerator};
pub use storage::{FsStorage, Storage};
