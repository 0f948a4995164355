//! The canonical metadata tree
//!
//! Every save operation produces exactly one [`CanonicalMetadata`] value; all
//! format handlers serialize from it and deserialize back into it. The tree
//! is modeled as typed sections with explicit optional fields rather than
//! loose JSON — values are parsed at the boundary, not cast.
//!
//! Shape invariant: section keys are fixed. Serializing and re-parsing any
//! tree produced by the engine yields the same shape; empty sections are
//! pruned from the serialized form, never renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::assets::{AssetRef, AssetSource, ModelRef};
use crate::stage::FallbackStage;

/// Top-level section names, in canonical order.
pub const SECTION_KEYS: &[&str] = &[
    "basic",
    "classification",
    "technical",
    "ai_info",
    "provenance",
];

/// Error raised when a value fails to re-validate as the canonical shape.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The value is not a JSON object
    #[error("canonical metadata is not a JSON object")]
    NotAnObject,
    /// The value carries a top-level key outside the canonical set
    #[error("unknown top-level section '{0}'")]
    UnknownSection(String),
    /// A known section failed to deserialize
    #[error("malformed canonical metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// User-facing descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Star rating, 0-5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl BasicInfo {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.author.is_none()
            && self.tags.is_empty()
            && self.rating.is_none()
            && self.notes.is_none()
    }
}

/// Content classification fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.content_tags.is_empty() && self.nsfw.is_none()
    }
}

/// Properties of the written image file itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
}

impl TechnicalInfo {
    pub fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.format.is_none()
            && self.color_space.is_none()
            && self.file_size_bytes.is_none()
    }
}

/// Parameters the sampler actually ran with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denoise: Option<f64>,
    /// Latent width requested from the sampler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Latent height requested from the sampler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.positive_prompt.is_none()
            && self.negative_prompt.is_none()
            && self.steps.is_none()
            && self.cfg_scale.is_none()
            && self.sampler_name.is_none()
            && self.scheduler.is_none()
            && self.seed.is_none()
            && self.denoise.is_none()
            && self.width.is_none()
            && self.height.is_none()
    }
}

/// Every asset that participated in the generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Checkpoint models, winner first; refiner-chain models follow
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vae: Vec<ModelRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loras: Vec<AssetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controlnets: Vec<AssetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeddings: Vec<AssetRef>,
}

impl AssetInfo {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
            && self.vae.is_empty()
            && self.loras.is_empty()
            && self.controlnets.is_empty()
            && self.embeddings.is_empty()
    }
}

/// Everything the engine learned from the workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiInfo {
    #[serde(default, skip_serializing_if = "GenerationParams::is_empty")]
    pub generation: GenerationParams,
    #[serde(default, skip_serializing_if = "AssetInfo::is_empty")]
    pub assets: AssetInfo,
    /// Normalized workflow graph snapshot, kept only at the Full stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
    /// Optional analysis results from external collaborators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

impl AiInfo {
    pub fn is_empty(&self) -> bool {
        self.generation.is_empty()
            && self.assets.is_empty()
            && self.workflow.is_none()
            && self.analysis.is_none()
    }
}

/// A record of something the engine decided against, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    /// A node matched a logical field but lost the candidate sort
    RejectedCandidate {
        field: String,
        node_id: String,
        distance: u32,
        priority: u8,
    },
    /// Two sources named the same asset with different strengths
    StrengthCollision {
        name: String,
        kept: AssetSource,
        dropped: AssetSource,
        dropped_strength_model: f64,
        dropped_strength_clip: f64,
    },
}

/// How and when this tree was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    /// Save-operation id, shared by every target of one save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    /// Stage the writer orchestrator landed on for this target.
    /// Handlers for size-constrained formats must honor this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_stage: Option<FallbackStage>,
    /// File name of the full-tree sidecar, set at the SidecarPointer stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit: Vec<AuditEntry>,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        self.generator.is_none()
            && self.save_id.is_none()
            && self.saved_at.is_none()
            && self.fallback_stage.is_none()
            && self.sidecar.is_none()
            && self.audit.is_empty()
    }
}

/// The canonical metadata tree.
///
/// Mutated only by the model builder; once handed to the writer orchestrator
/// it is read-only and per-target filtering is applied to copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetadata {
    #[serde(default, skip_serializing_if = "BasicInfo::is_empty")]
    pub basic: BasicInfo,
    #[serde(default, skip_serializing_if = "Classification::is_empty")]
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "TechnicalInfo::is_empty")]
    pub technical: TechnicalInfo,
    #[serde(default, skip_serializing_if = "AiInfo::is_empty")]
    pub ai_info: AiInfo,
    #[serde(default, skip_serializing_if = "Provenance::is_empty")]
    pub provenance: Provenance,
}

impl CanonicalMetadata {
    /// True when every section is empty (serializes to `{}`).
    pub fn is_empty(&self) -> bool {
        self.basic.is_empty()
            && self.classification.is_empty()
            && self.technical.is_empty()
            && self.ai_info.is_empty()
            && self.provenance.is_empty()
    }

    /// Serialize to a JSON value with empty sections pruned.
    pub fn to_value(&self) -> Value {
        // Serialization of this type cannot fail: no maps with non-string
        // keys, no non-finite float sources.
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// Parse a JSON value back into the canonical shape.
    ///
    /// Rejects values whose top level carries keys outside the canonical
    /// section set — a renamed section is a shape violation, not data.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;
        for key in obj.keys() {
            if !SECTION_KEYS.contains(&key.as_str()) {
                return Err(SchemaError::UnknownSection(key.clone()));
            }
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Round-trip through the serialized form.
    ///
    /// Used by tests and debug assertions to check the shape invariant:
    /// any tree the engine produces must re-validate as the same shape.
    pub fn reparse(&self) -> Result<Self, SchemaError> {
        Self::from_value(&self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetRef;

    fn sample() -> CanonicalMetadata {
        let mut meta = CanonicalMetadata::default();
        meta.basic.title = Some("Test render".to_string());
        meta.ai_info.generation.steps = Some(20);
        meta.ai_info.generation.positive_prompt = Some("masterpiece".to_string());
        meta.ai_info.assets.loras.push(AssetRef::inline("x", 1.0, 1.0));
        meta.provenance.fallback_stage = Some(FallbackStage::Full);
        meta
    }

    #[test]
    fn test_empty_sections_pruned_from_serialized_form() {
        let meta = sample();
        let value = meta.to_value();
        assert!(value.get("basic").is_some());
        assert!(value.get("ai_info").is_some());
        // Untouched sections do not survive serialization
        assert!(value.get("classification").is_none());
        assert!(value.get("technical").is_none());
    }

    #[test]
    fn test_round_trip_preserves_shape() {
        let meta = sample();
        let reparsed = meta.reparse().unwrap();
        assert_eq!(meta, reparsed);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let mut value = sample().to_value();
        let obj = value.as_object_mut().unwrap();
        let ai = obj.remove("ai_info").unwrap();
        obj.insert("aiInfo".to_string(), ai);
        match CanonicalMetadata::from_value(&value) {
            Err(SchemaError::UnknownSection(key)) => assert_eq!(key, "aiInfo"),
            other => panic!("expected UnknownSection, got {:?}", other),
        }
    }

    #[test]
    fn test_default_tree_is_empty() {
        let meta = CanonicalMetadata::default();
        assert!(meta.is_empty());
        assert_eq!(meta.to_value(), serde_json::json!({}));
    }

    #[test]
    fn test_from_value_tolerates_missing_sections() {
        let value = serde_json::json!({
            "ai_info": { "generation": { "steps": 30 } }
        });
        let meta = CanonicalMetadata::from_value(&value).unwrap();
        assert_eq!(meta.ai_info.generation.steps, Some(30));
        assert!(meta.basic.is_empty());
    }
}
