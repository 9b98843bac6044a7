use std::env;
use std::fmt;

pub(crate) const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub(crate) const DEFAULT_ANALYSIS_MODEL: &str = "gemini-3-pro-preview";
pub(crate) const DEFAULT_RENDER_MODEL: &str = "gemini-2.5-flash-image";
pub(crate) const DEFAULT_IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub(crate) const DEFAULT_THINKING_BUDGET: u64 = 2000;

/// Connection settings for the Gemini / Imagen endpoints.
#[derive(Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub analysis_model: String,
    pub render_model: String,
    pub imagen_model: String,
    pub thinking_budget: u64,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            render_model: DEFAULT_RENDER_MODEL.to_string(),
            imagen_model: DEFAULT_IMAGEN_MODEL.to_string(),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            request_timeout_s: 90.0,
            transport_retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: get("GEMINI_API_KEY")
                .or_else(|| get("GOOGLE_API_KEY"))
                .or_else(|| get("API_KEY")),
            analysis_model: get("SKETCHMAT_ANALYSIS_MODEL").unwrap_or(defaults.analysis_model),
            render_model: get("SKETCHMAT_RENDER_MODEL").unwrap_or(defaults.render_model),
            imagen_model: get("SKETCHMAT_IMAGEN_MODEL").unwrap_or(defaults.imagen_model),
            thinking_budget: defaults.thinking_budget,
            request_timeout_s: clamped_f64(
                get("SKETCHMAT_REQUEST_TIMEOUT"),
                defaults.request_timeout_s,
                15.0,
                300.0,
            ),
            transport_retries: clamped_f64(
                get("SKETCHMAT_TRANSPORT_RETRIES"),
                defaults.transport_retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: clamped_f64(
                get("SKETCHMAT_RETRY_BACKOFF"),
                defaults.retry_backoff_s,
                0.1,
                10.0,
            ),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("analysis_model", &self.analysis_model)
            .field("render_model", &self.render_model)
            .field("imagen_model", &self.imagen_model)
            .field("thinking_budget", &self.thinking_budget)
            .field("request_timeout_s", &self.request_timeout_s)
            .field("transport_retries", &self.transport_retries)
            .field("retry_backoff_s", &self.retry_backoff_s)
            .finish()
    }
}

fn clamped_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
