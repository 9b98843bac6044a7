use serde::{Deserialize, Serialize};

use crate::params::LightingPreset;

/// Snapshot of the generation parameters in effect when an image was made.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GalleryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<LightingPreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_reference: Option<String>,
}

#[derive(Clone, PartialEq)]
pub struct GalleryEntry {
    pub id: i64,
    pub image_data: Vec<u8>,
    pub prompt: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub metadata: GalleryMetadata,
}

impl std::fmt::Debug for GalleryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryEntry")
            .field("id", &self.id)
            .field("image_data", &format_args!("<{} bytes>", self.image_data.len()))
            .field("prompt", &self.prompt)
            .field("timestamp", &self.timestamp)
            .field("metadata", &self.metadata)
            .finish()
    }
}
