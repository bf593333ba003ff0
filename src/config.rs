use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// What to do with model text that parses but raises quality issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPolicy {
    /// Use the text, log the issues, drop a discriminant that has its own issues.
    Lenient,
    /// Any issue routes to the fallback synthesizer.
    Strict,
}

impl FromStr for QualityPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(QualityPolicy::Lenient),
            "strict" => Ok(QualityPolicy::Strict),
            other => anyhow::bail!("unknown quality policy '{}' (lenient | strict)", other),
        }
    }
}

/// Word-count and length bounds for explanations and clues.
#[derive(Debug, Clone)]
pub struct QualityLimits {
    pub min_words: usize,
    pub max_words: usize,
    /// Multiplier applied to `max_words` before an explanation counts as too long.
    pub upper_tolerance: f32,
    pub max_clue_chars: usize,
    pub min_clue_chars: usize,
}

impl Default for QualityLimits {
    fn default() -> Self {
        Self {
            min_words: 8,
            max_words: 70,
            upper_tolerance: 1.5,
            max_clue_chars: 200,
            min_clue_chars: 6,
        }
    }
}

/// Generation parameters and retry policy for the model call.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Backoff after attempt `n` is `backoff_step * n`.
    pub backoff_step: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask for a JSON schema response instead of `---` separated text.
    pub structured_output: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(30),
            backoff_step: Duration::from_millis(800),
            temperature: 0.4,
            max_output_tokens: 512,
            structured_output: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    pub stale_ttl: Duration,
    pub prune_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 2_000,
            ttl: Duration::from_secs(7 * 24 * 3600),
            stale_ttl: Duration::from_secs(24 * 3600),
            prune_interval: Duration::from_secs(600),
        }
    }
}

/// Everything the pipeline can be tuned with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub generation: GenerationConfig,
    pub quality_policy: QualityPolicy,
    pub limits: QualityLimits,
    pub reference_timeout: Duration,
    /// Per-description character budget in the model context.
    pub description_budget: usize,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            quality_policy: QualityPolicy::Lenient,
            limits: QualityLimits::default(),
            reference_timeout: Duration::from_secs(5),
            description_budget: 600,
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by environment variables (a `.env` file is honoured
    /// when the binary loads it first).
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let generation = GenerationConfig {
            max_attempts: env_or("GENERATION_MAX_ATTEMPTS", d.generation.max_attempts)?.max(1),
            attempt_timeout: Duration::from_secs(env_or(
                "GENERATION_ATTEMPT_TIMEOUT_SECS",
                d.generation.attempt_timeout.as_secs(),
            )?),
            backoff_step: Duration::from_millis(env_or(
                "GENERATION_BACKOFF_MS",
                d.generation.backoff_step.as_millis() as u64,
            )?),
            temperature: env_or("GENERATION_TEMPERATURE", d.generation.temperature)?,
            max_output_tokens: env_or("GENERATION_MAX_OUTPUT_TOKENS", d.generation.max_output_tokens)?,
            structured_output: env_or("GENERATION_STRUCTURED_OUTPUT", d.generation.structured_output)?,
        };
        let cache = CacheConfig {
            capacity: env_or("CACHE_CAPACITY", d.cache.capacity)?.max(1),
            ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", d.cache.ttl.as_secs())?),
            stale_ttl: Duration::from_secs(env_or("CACHE_STALE_TTL_SECS", d.cache.stale_ttl.as_secs())?),
            prune_interval: Duration::from_secs(
                env_or("CACHE_PRUNE_INTERVAL_SECS", d.cache.prune_interval.as_secs())?.max(1),
            ),
        };

        Ok(Self {
            generation,
            quality_policy: env_or("QUALITY_POLICY", d.quality_policy)?,
            limits: d.limits,
            reference_timeout: Duration::from_secs(env_or(
                "REFERENCE_TIMEOUT_SECS",
                d.reference_timeout.as_secs(),
            )?),
            description_budget: d.description_budget,
            cache,
        })
    }
}

/// Parse `key` from the environment, falling back to `default` when unset or blank.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match dotenv::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}
