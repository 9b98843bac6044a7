use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gallery::GalleryMetadata;

pub const DEFAULT_CONSISTENCY: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LightingPreset {
    #[serde(rename = "Golden Hour")]
    GoldenHour,
    #[default]
    #[serde(rename = "Overcast")]
    Overcast,
    #[serde(rename = "Studio")]
    Studio,
    #[serde(rename = "Interior Artificial")]
    InteriorArtificial,
}

impl LightingPreset {
    pub const ALL: [LightingPreset; 4] = [
        LightingPreset::GoldenHour,
        LightingPreset::Overcast,
        LightingPreset::Studio,
        LightingPreset::InteriorArtificial,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LightingPreset::GoldenHour => "Golden Hour",
            LightingPreset::Overcast => "Overcast",
            LightingPreset::Studio => "Studio",
            LightingPreset::InteriorArtificial => "Interior Artificial",
        }
    }
}

impl fmt::Display for LightingPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LightingPreset {
    type Err = ParameterError;

    /// Accepts the display label as well as snake/kebab spellings, any case.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ");
        LightingPreset::ALL
            .into_iter()
            .find(|preset| preset.label().to_ascii_lowercase() == normalized)
            .ok_or_else(|| ParameterError::UnknownLighting(raw.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[default]
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    /// Pixel dimensions with the long edge fixed at `long_edge`.
    pub fn dims(self, long_edge: u32) -> (u32, u32) {
        let (w, h) = match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Portrait => (3, 4),
            AspectRatio::Landscape => (4, 3),
            AspectRatio::Tall => (9, 16),
            AspectRatio::Wide => (16, 9),
        };
        if w >= h {
            (long_edge, long_edge * h / w)
        } else {
            (long_edge * w / h, long_edge)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ParameterError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().replace('/', ":");
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == value)
            .ok_or_else(|| ParameterError::UnknownAspectRatio(raw.trim().to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("consistency must be within [0, 1], got {0}")]
    ConsistencyOutOfRange(f64),
    #[error("unknown lighting preset '{0}'")]
    UnknownLighting(String),
    #[error("unsupported aspect ratio '{0}'")]
    UnknownAspectRatio(String),
}

/// Ambient knobs applied to the next generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub lighting: LightingPreset,
    pub consistency: f64,
    pub style_reference: Option<String>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            lighting: LightingPreset::default(),
            consistency: DEFAULT_CONSISTENCY,
            style_reference: None,
        }
    }
}

/// Partial update; `style_reference: Some(None)` clears the reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterUpdate {
    pub lighting: Option<LightingPreset>,
    pub consistency: Option<f64>,
    pub style_reference: Option<Option<String>>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        self.lighting.is_none() && self.consistency.is_none() && self.style_reference.is_none()
    }
}

impl GenerationParameters {
    /// Merges `update` in place. Validation happens before any field changes,
    /// so a rejected update leaves the parameters untouched.
    pub fn apply(&mut self, update: ParameterUpdate) -> Result<(), ParameterError> {
        if let Some(consistency) = update.consistency {
            if !(0.0..=1.0).contains(&consistency) {
                return Err(ParameterError::ConsistencyOutOfRange(consistency));
            }
        }
        if let Some(lighting) = update.lighting {
            self.lighting = lighting;
        }
        if let Some(consistency) = update.consistency {
            self.consistency = consistency;
        }
        if let Some(style_reference) = update.style_reference {
            self.style_reference = style_reference;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> GalleryMetadata {
        GalleryMetadata {
            lighting: Some(self.lighting),
            consistency: Some(self.consistency),
            style_reference: self.style_reference.clone(),
        }
    }
}
