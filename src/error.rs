use thiserror::Error;

/// Failure of one call to the generative text service.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generative service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generative service returned no text")]
    EmptyText,

    #[error("generative service attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("generative service request failed: {0}")]
    Transport(String),

    #[error("generative service response could not be decoded: {0}")]
    Decode(String),
}

impl GenerationError {
    /// Rate limiting, server errors, empty answers and slow attempts are worth
    /// another try. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            GenerationError::EmptyText | GenerationError::Timeout(_) => true,
            GenerationError::Transport(_) | GenerationError::Decode(_) => false,
        }
    }
}

/// Caller contract violations. The only errors the pipeline surfaces.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("taxon must have a positive id")]
    MissingTaxonId,

    #[error("taxon {0} has no scientific name")]
    MissingScientificName(u64),

    #[error("locale must not be empty")]
    MissingLocale,
}
