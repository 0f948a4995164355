//! Asset reference types
//!
//! An [`AssetRef`] describes one auxiliary asset (LoRA, ControlNet,
//! embedding) that participated in a generation, regardless of whether it was
//! discovered through a loader node in the workflow graph or through an
//! inline tag embedded in prompt text.

use serde::{Deserialize, Serialize};

/// Where an asset reference was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    /// Wired through a loader node in the workflow graph
    Loader,
    /// Embedded as an inline tag in prompt text (e.g. `<lora:name:0.8>`)
    Inline,
}

impl std::fmt::Display for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loader => write!(f, "loader"),
            Self::Inline => write!(f, "inline"),
        }
    }
}

/// A reference to a strength-weighted asset such as a LoRA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Asset name as discovered (file stem or tag name)
    pub name: String,
    /// Strength applied to the model (UNet) half
    pub strength_model: f64,
    /// Strength applied to the text-encoder (CLIP) half
    pub strength_clip: f64,
    /// SHA-256 digest of the asset file, when resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// How this reference was discovered
    pub source: AssetSource,
}

impl AssetRef {
    /// Create a loader-sourced reference.
    pub fn loader(name: impl Into<String>, strength_model: f64, strength_clip: f64) -> Self {
        Self {
            name: name.into(),
            strength_model,
            strength_clip,
            hash: None,
            source: AssetSource::Loader,
        }
    }

    /// Create an inline-sourced reference.
    pub fn inline(name: impl Into<String>, strength_model: f64, strength_clip: f64) -> Self {
        Self {
            name: name.into(),
            strength_model,
            strength_clip,
            hash: None,
            source: AssetSource::Inline,
        }
    }

    /// Attach a resolved file digest.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Identity key: the case-folded name.
    ///
    /// Two references to the same asset may differ in case depending on
    /// whether they came from a loader widget or hand-typed prompt text.
    pub fn normalized_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// A reference to a checkpoint or VAE model (no strength weighting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    /// Model name as discovered (usually the file name)
    pub name: String,
    /// SHA-256 digest of the model file, when resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ModelRef {
    /// Create a model reference by name only.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: None,
        }
    }

    /// Attach a resolved file digest.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_name_folds_case() {
        let a = AssetRef::loader("DetailTweaker", 1.0, 1.0);
        let b = AssetRef::inline("detailtweaker", 0.5, 0.5);
        assert_eq!(a.normalized_name(), b.normalized_name());
    }

    #[test]
    fn test_asset_source_serializes_snake_case() {
        let json = serde_json::to_string(&AssetSource::Loader).unwrap();
        assert_eq!(json, "\"loader\"");
    }

    #[test]
    fn test_hash_omitted_when_absent() {
        let json = serde_json::to_value(AssetRef::inline("x", 1.0, 1.0)).unwrap();
        assert!(json.get("hash").is_none());
    }
}
