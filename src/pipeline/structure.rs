//! ContentStructurer: manuscript text → ordered content blocks.
//!
//! One instruction prompt, one call per candidate text model. A reply that
//! does not parse as the block schema counts as a failure of that candidate
//! and the next one is tried, exactly like a transport error would be.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{Manuscript, RunStage, StructuredContent};
use crate::pipeline::fallback::{first_success, FallbackPolicy};
use crate::pipeline::parse::parse_structure;
use crate::prompts::structuring_instruction;
use crate::providers::TextGenerator;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct ContentStructurer {
    generator: Arc<dyn TextGenerator>,
    models: Vec<String>,
    instruction: String,
    min_illustrations: usize,
    policy: FallbackPolicy,
}

impl ContentStructurer {
    pub fn new(config: &PipelineConfig, generator: Arc<dyn TextGenerator>, policy: FallbackPolicy) -> Self {
        Self {
            generator,
            models: config.text_models.clone(),
            instruction: structuring_instruction(config.min_illustrations, config.max_illustrations),
            min_illustrations: config.min_illustrations,
            policy,
        }
    }

    /// Structure a stored manuscript; its title and author fill in whatever
    /// the model leaves out.
    pub async fn structure(&self, manuscript: &Manuscript) -> Result<StructuredContent, PipelineError> {
        self.structure_text(&manuscript.text, &manuscript.title, &manuscript.author)
            .await
    }

    /// Structure raw `text`.
    ///
    /// # Errors
    /// * [`PipelineError::InvalidInput`] for blank text (no model is called)
    /// * [`PipelineError::UpstreamUnavailable`] once every candidate failed
    pub async fn structure_text(
        &self,
        text: &str,
        fallback_title: &str,
        fallback_author: &str,
    ) -> Result<StructuredContent, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("manuscript text is empty".into()));
        }

        let start = Instant::now();
        let generator = &self.generator;
        let instruction = self.instruction.as_str();

        let outcome = first_success("structuring", &self.models, &self.policy, |model| async move {
            let reply = generator.generate(&model, instruction, text).await?;
            parse_structure(&reply, fallback_title, fallback_author)
        })
        .await;

        match outcome {
            Ok((model, content)) => {
                let prompts = content.image_prompt_count();
                info!(
                    "Structured with {}: {} blocks, {} illustrations ({:?})",
                    model,
                    content.blocks.len(),
                    prompts,
                    start.elapsed()
                );
                if prompts < self.min_illustrations {
                    warn!(
                        "{} returned {} illustrations, fewer than the {} requested",
                        model, prompts, self.min_illustrations
                    );
                }
                Ok(content)
            }
            Err(failures) => Err(PipelineError::UpstreamUnavailable {
                stage: RunStage::Structuring,
                failures,
            }),
        }
    }
}
