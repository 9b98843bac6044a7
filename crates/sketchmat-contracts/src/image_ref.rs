use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Where an image's bytes live.
///
/// `Inline` carries the payload as a base64 `data:` URI; `Handle` is an
/// opaque location (file path, `file://` or `http(s)://` URL) that has to be
/// read or fetched before the bytes are available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageReference {
    Inline { mime_type: String, data: String },
    Handle { location: String },
}

impl ImageReference {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((header, data)) = rest.split_once(',') {
                let mime_type = header
                    .split(';')
                    .next()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("application/octet-stream")
                    .to_string();
                return Self::Inline {
                    mime_type,
                    data: data.trim().to_string(),
                };
            }
        }
        Self::Handle {
            location: trimmed.to_string(),
        }
    }

    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self::Inline {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn handle(location: impl Into<String>) -> Self {
        Self::Handle {
            location: location.into(),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Inline { mime_type, .. } => Some(mime_type.as_str()),
            Self::Handle { .. } => None,
        }
    }

    pub fn to_uri(&self) -> String {
        match self {
            Self::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
            Self::Handle { location } => location.clone(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { mime_type, data } => {
                write!(f, "inline {mime_type} ({} base64 chars)", data.len())
            }
            Self::Handle { location } => f.write_str(location),
        }
    }
}
