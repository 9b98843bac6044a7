mod config;
mod coordinator;
mod providers;
mod resolve;
mod router;
mod studio;

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

pub use config::GeminiConfig;
pub use coordinator::StateCoordinator;
pub use providers::{build_client, DryrunClient, GeminiClient, GenerationClient, PROVIDER_NAMES};
pub use resolve::resolve_to_bytes;
pub use router::{
    ConversationRouter, ProducedImage, RouteOutcome, SubmitError, ACK_ATTACHMENT_RENDER,
    ACK_CANVAS_RENDER, ATTACHMENT_ANALYSIS_FALLBACK, ATTACHMENT_RENDER_EMPTY,
    CANVAS_ANALYSIS_FALLBACK, CANVAS_RENDER_EMPTY, DEFAULT_ANALYSIS_QUESTION, PROMPT_FOR_INPUT,
    REMOTE_FAILURE_APOLOGY,
};
pub use studio::{write_render, Studio, TurnReport};

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

/// MIME type guessed from magic bytes, `fallback` when unrecognized.
pub(crate) fn sniff_mime<'a>(bytes: &[u8], fallback: &'a str) -> &'a str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(fallback)
}

pub(crate) fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png")
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}
