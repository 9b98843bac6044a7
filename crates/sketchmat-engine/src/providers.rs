use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sketchmat_contracts::params::AspectRatio;

use crate::config::GeminiConfig;
use crate::{sniff_mime, truncate_text};

pub const PROVIDER_NAMES: &[&str] = &["gemini", "dryrun"];

const CRITIC_PREAMBLE: &str = "You are an expert architectural critic. Analyze this architectural sketch/render and respond to the following prompt: ";
const RENDER_PREAMBLE: &str =
    "Transform this architectural sketch into a hyper-realistic architectural render.";
const RENDER_SUFFIX: &str = "Ensure architectural photorealism, 8k, v-ray style.";
const IMAGEN_PREFIX: &str = "architectural photorealism, high-end interior design, 8k, v-ray style, cinematic lighting, detailed textures, ";
const DRYRUN_LONG_EDGE: u32 = 512;

/// Remote generative service used by the router and the studio.
///
/// `transform` distinguishes "the service answered without an image"
/// (`Ok(None)`) from transport or service failures (`Err`).
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image: &[u8], question: &str) -> Result<String>;
    fn transform(&self, image: &[u8], instruction: &str) -> Result<Option<Vec<u8>>>;
    fn generate_from_text(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<Vec<u8>>;
}

pub fn build_client(name: &str, config: GeminiConfig) -> Result<Arc<dyn GenerationClient>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "gemini" => Ok(Arc::new(GeminiClient::new(config)?)),
        "dryrun" => Ok(Arc::new(DryrunClient)),
        other => bail!(
            "unknown provider '{other}' (expected one of: {})",
            PROVIDER_NAMES.join(", ")
        ),
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs_f64(config.request_timeout_s))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    fn api_key(&self) -> Result<&str> {
        match self.config.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set"),
        }
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.config.api_base, model_path, method)
    }

    fn analyze_payload(&self, image: &[u8], question: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(image, "image/jpeg"),
                    { "text": format!("{CRITIC_PREAMBLE}{question}") },
                ],
            }],
            "generationConfig": {
                "thinkingConfig": { "thinkingBudget": self.config.thinking_budget },
            },
        })
    }

    fn transform_payload(image: &[u8], instruction: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(image, "image/png"),
                    { "text": format!("{RENDER_PREAMBLE} {instruction}. {RENDER_SUFFIX}") },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            },
        })
    }

    fn imagen_payload(prompt: &str, aspect_ratio: AspectRatio) -> Value {
        json!({
            "instances": [{ "prompt": format!("{IMAGEN_PREFIX}{prompt}") }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio.as_str(),
                "outputOptions": { "mimeType": "image/jpeg" },
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        provider: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        let api_key = self.api_key()?;
        let max_retries = self.config.transport_retries;
        for attempt in 0..=max_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("{provider} request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    tracing::warn!(
                        provider,
                        attempt = attempt + 1,
                        max_retries,
                        "transport retry after transient request failure"
                    );
                    let delay_s = self.config.retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        unreachable!("transport retry loop always returns a response or an error")
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze(&self, image: &[u8], question: &str) -> Result<String> {
        let endpoint = self.model_endpoint(&self.config.analysis_model, "generateContent");
        let payload = self.analyze_payload(image, question);
        let response = self.post_with_transport_retries("Gemini", &endpoint, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Ok(extract_text(&response_payload))
    }

    fn transform(&self, image: &[u8], instruction: &str) -> Result<Option<Vec<u8>>> {
        let endpoint = self.model_endpoint(&self.config.render_model, "generateContent");
        let payload = Self::transform_payload(image, instruction);
        let response = self.post_with_transport_retries("Gemini", &endpoint, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        for text in candidate_parts(&response_payload)
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
        {
            tracing::debug!(text = %truncate_text(text, 400), "render response text part");
        }
        extract_first_inline_image(&response_payload)
    }

    fn generate_from_text(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<Vec<u8>> {
        let endpoint = self.model_endpoint(&self.config.imagen_model, "predict");
        let payload = Self::imagen_payload(prompt, aspect_ratio);
        let response = self.post_with_transport_retries("Imagen", &endpoint, &payload)?;
        let response_payload = response_json_or_error("Imagen", response)?;
        match extract_first_prediction(&response_payload)? {
            Some(bytes) => Ok(bytes),
            None => bail!("Imagen returned no images"),
        }
    }
}

/// Offline client: deterministic solid-color PNGs and canned analyses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunClient;

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(&self, image: &[u8], question: &str) -> Result<String> {
        let decoded =
            image::load_from_memory(image).context("dryrun analysis could not decode image")?;
        Ok(format!(
            "Dryrun analysis of a {}x{} image: {}",
            decoded.width(),
            decoded.height(),
            question.trim()
        ))
    }

    fn transform(&self, image: &[u8], instruction: &str) -> Result<Option<Vec<u8>>> {
        let decoded =
            image::load_from_memory(image).context("dryrun render could not decode image")?;
        let mut hasher = Sha256::new();
        hasher.update(image);
        hasher.update(instruction.as_bytes());
        let digest = hasher.finalize();
        let png = solid_png(
            decoded.width().max(1),
            decoded.height().max(1),
            (digest[0], digest[1], digest[2]),
        )?;
        Ok(Some(png))
    }

    fn generate_from_text(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<Vec<u8>> {
        let (width, height) = aspect_ratio.dims(DRYRUN_LONG_EDGE);
        solid_png(width, height, color_from_prompt(prompt))
    }
}

fn inline_image_part(image: &[u8], fallback_mime: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": sniff_mime(image, fallback_mime),
            "data": BASE64.encode(image),
        }
    })
}

fn candidate_parts(response_payload: &Value) -> Vec<Map<String, Value>> {
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Concatenated text of the first candidate, thought summaries excluded.
fn extract_text(response_payload: &Value) -> String {
    candidate_parts(response_payload)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

fn extract_first_inline_image(response_payload: &Value) -> Result<Option<Vec<u8>>> {
    for part in candidate_parts(response_payload) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

fn extract_first_prediction(response_payload: &Value) -> Result<Option<Vec<u8>>> {
    let predictions = response_payload
        .get("predictions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in predictions {
        let encoded = row
            .get("bytesBase64Encoded")
            .or_else(|| row.get("bytes_base64_encoded"))
            .or_else(|| row.get("image").and_then(|image| image.get("imageBytes")))
            .and_then(Value::as_str);
        if let Some(encoded) = encoded {
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Imagen image base64 decode failed")?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn solid_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode dryrun PNG")?;
    Ok(out.into_inner())
}
