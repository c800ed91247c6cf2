//! Remote bike classification via an OpenAI-compatible vision API, with a
//! random degraded-mode fallback when the remote call fails.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use rand::Rng;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::models::{Prediction, BIKE_MODELS};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const VISION_MODEL: &str = "gpt-4o";
const MAX_RESPONSE_TOKENS: u32 = 500;
const JPEG_QUALITY: u8 = 90;
const TOP_K: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("OPENAI_API_KEY environment variable is not set")]
    MissingApiKey,
    #[error("failed to encode image as JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("request to vision API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("vision API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response from vision API: {0}")]
    InvalidResponse(String),
}

/// Seam between the detection pipeline and the remote model provider.
///
/// One operation: send a single-turn multimodal prompt and return the
/// model's raw text reply. Tests inject deterministic stubs here.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn classify(&self, prompt: &str, image_data_uri: &str) -> Result<String, DetectorError>;
}

/// Production backend talking to the OpenAI chat-completions API.
pub struct OpenAiVision {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiVision {
    /// Build the client from the environment. A missing `OPENAI_API_KEY`
    /// is a hard startup failure; `OPENAI_BASE_URL` optionally points at
    /// a compatible endpoint.
    pub fn from_env() -> Result<Self, DetectorError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| DetectorError::MissingApiKey)?;
        let endpoint = match std::env::var("OPENAI_BASE_URL") {
            Ok(base) => format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            Err(_) => OPENAI_API_URL.to_string(),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl VisionBackend for OpenAiVision {
    async fn classify(&self, prompt: &str, image_data_uri: &str) -> Result<String, DetectorError> {
        let body = serde_json::json!({
            "model": VISION_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_data_uri } }
                ]
            }],
            "max_tokens": MAX_RESPONSE_TOKENS,
        });

        debug!("vision classify POST {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(DetectorError::Api { status, message });
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| DetectorError::InvalidResponse("no choices in reply".to_string()))
    }
}

/// Detection pipeline: encode, prompt, parse, normalize; fall back to
/// random scores on any adapter failure.
pub struct Detector {
    backend: Arc<dyn VisionBackend>,
}

impl Detector {
    pub fn new(backend: Arc<dyn VisionBackend>) -> Self {
        Self { backend }
    }

    /// Classify the image. Never fails: any adapter error is logged and
    /// absorbed into the random fallback, so the caller always gets a
    /// non-empty prediction list.
    pub async fn detect(&self, image: &DynamicImage) -> Vec<Prediction> {
        match self.classify_remote(image).await {
            Ok(predictions) => predictions,
            Err(e) => {
                error!("vision API error, using random fallback: {}", e);
                random_predictions(&mut rand::thread_rng())
            }
        }
    }

    async fn classify_remote(&self, image: &DynamicImage) -> Result<Vec<Prediction>, DetectorError> {
        let data_uri = encode_jpeg_data_uri(image)?;
        let reply = self.backend.classify(&build_prompt(), &data_uri).await?;

        let mut predictions = parse_predictions(&reply)?;
        predictions.truncate(TOP_K);
        normalize(&mut predictions);
        Ok(predictions)
    }
}

fn build_prompt() -> String {
    format!(
        "Identify the motorcycle model shown in this image. Pick the 3 most likely \
         models from the list below and return each with a confidence between 0 and 1.\n\n\
         Available models:\n{}\n\n\
         Reply with JSON in exactly this shape:\n\
         {{\n  \"predictions\": [\n    {{\"model\": \"model name\", \"confidence\": 0.85}},\n    \
         {{\"model\": \"model name\", \"confidence\": 0.10}},\n    \
         {{\"model\": \"model name\", \"confidence\": 0.05}}\n  ]\n}}\n\n\
         If no motorcycle is visible, guess the closest model anyway.",
        BIKE_MODELS.join(", ")
    )
}

fn encode_jpeg_data_uri(image: &DynamicImage) -> Result<String, DetectorError> {
    let mut jpeg = Vec::new();
    image.write_to(
        &mut Cursor::new(&mut jpeg),
        image::ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}

#[derive(Debug, Deserialize)]
struct PredictionsPayload {
    predictions: Vec<Prediction>,
}

/// Parse the model's reply, first as a strict JSON document, then by
/// scanning for the outermost braces when the reply wraps the JSON in
/// prose. Anything else is an adapter error, never an empty result.
fn parse_predictions(reply: &str) -> Result<Vec<Prediction>, DetectorError> {
    let payload: PredictionsPayload = match serde_json::from_str(reply.trim()) {
        Ok(payload) => payload,
        Err(_) => {
            let start = reply
                .find('{')
                .ok_or_else(|| DetectorError::InvalidResponse("no JSON object in reply".to_string()))?;
            let end = reply
                .rfind('}')
                .filter(|&end| end > start)
                .ok_or_else(|| DetectorError::InvalidResponse("no JSON object in reply".to_string()))?;
            serde_json::from_str(&reply[start..=end]).map_err(|e| {
                DetectorError::InvalidResponse(format!("malformed JSON in reply: {}", e))
            })?
        }
    };

    if payload.predictions.is_empty() {
        return Err(DetectorError::InvalidResponse(
            "empty predictions list".to_string(),
        ));
    }
    Ok(payload.predictions)
}

/// Rescale confidences to sum to 1. A non-positive sum is left untouched.
fn normalize(predictions: &mut [Prediction]) {
    let total: f64 = predictions.iter().map(|p| p.confidence).sum();
    if total > 0.0 {
        for prediction in predictions.iter_mut() {
            prediction.confidence /= total;
        }
    }
}

/// Degraded mode: one uniform random score per candidate label, top 3 kept
/// in descending order and renormalized to sum to 1. Not a classifier,
/// only a placeholder while the remote provider is unreachable.
fn random_predictions<R: Rng>(rng: &mut R) -> Vec<Prediction> {
    let mut scored: Vec<(usize, f64)> = (0..BIKE_MODELS.len()).map(|i| (i, rng.gen())).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(TOP_K);

    let mut predictions: Vec<Prediction> = scored
        .into_iter()
        .map(|(i, score)| Prediction {
            model: BIKE_MODELS[i].to_string(),
            confidence: score,
        })
        .collect();
    normalize(&mut predictions);
    predictions
}
