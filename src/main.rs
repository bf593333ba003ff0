use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use naturequiz_ai::{GeminiClient, Pipeline, PipelineConfig, Taxon, WikipediaClient};

const USAGE: &str = "usage: naturequiz-ai <explain|riddle> <request.json>";

/// `{"locale": "fr", "correct": {...}, "wrong": {...}}`
#[derive(Deserialize)]
struct ExplainRequest {
    locale: String,
    correct: Taxon,
    wrong: Taxon,
}

/// `{"locale": "fr", "target": {...}}`
#[derive(Deserialize)]
struct RiddleRequest {
    locale: String,
    target: Taxon,
}

fn read_request<T: for<'de> Deserialize<'de>>(path: &PathBuf) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid request JSON in {:?}", path))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(command), Some(path)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };
    let path = PathBuf::from(path);

    let config = PipelineConfig::from_env()?;
    let generator = Arc::new(GeminiClient::from_env()?);
    let encyclopedia = Arc::new(WikipediaClient::from_env(config.reference_timeout)?);
    info!(policy = ?config.quality_policy, max_attempts = config.generation.max_attempts, "pipeline configured");

    let pipeline = Pipeline::new(generator, encyclopedia, config);
    let _pruners = pipeline.spawn_pruners();

    let output = match command.as_str() {
        "explain" => {
            let request: ExplainRequest = read_request(&path)?;
            let result = pipeline
                .generate_explanation(&request.correct, &request.wrong, &request.locale)
                .await?;
            serde_json::to_string_pretty(&result)?
        }
        "riddle" => {
            let request: RiddleRequest = read_request(&path)?;
            let result = pipeline
                .generate_riddle(&request.target, &request.locale)
                .await?;
            serde_json::to_string_pretty(&result)?
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    };

    println!("{}", output);
    Ok(())
}
