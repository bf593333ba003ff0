pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod quality;
pub mod reference;
pub mod taxon;
pub mod text;

pub use config::{PipelineConfig, QualityPolicy};
pub use error::{GenerationError, PipelineError};
pub use llm::{GeminiClient, TextGenerator};
pub use pipeline::{Pipeline, PIPELINE_VERSION};
pub use reference::{EncyclopediaSource, WikipediaClient};
pub use taxon::{ExplanationResult, RiddleResult, RiddleSource, Taxon};
