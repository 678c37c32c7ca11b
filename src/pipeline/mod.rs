//! Pipeline stages for turning a manuscript into an illustrated book.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the orchestrator only sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! structure ──▶ images ──▶ render
//!  (text LLM)  (image models / test pool)  (pdf-writer)
//! ```
//!
//! 1. [`structure`]: one fallback over the text models; the reply goes
//!    through [`parse`] and must match the content-block schema
//! 2. [`images`]: per-block fallback over the image models (payloads
//!    normalised by [`encode`]), or cyclic assignment from the test pool
//! 3. [`render`]: deterministic layout; runs in `spawn_blocking` and takes
//!    its font from [`fonts`]
//!
//! [`fallback`] holds the ordered-candidate algorithm and the shared
//! rate-limit back-off used by stages 1 and 2.

pub mod encode;
pub mod fallback;
pub mod fonts;
pub mod images;
pub mod parse;
pub mod render;
pub mod structure;
