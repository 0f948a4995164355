//! Writer orchestration and staged fallback
//!
//! The orchestrator dispatches one immutable canonical tree to every
//! configured format handler. Unconstrained targets (sidecars, text,
//! database) receive the Full stage unconditionally. Size-constrained
//! targets walk the fallback ladder: after filtering a copy of the tree for
//! each stage, the serialized payload is measured against the handler's
//! declared limit and the first stage that fits is written. The landed stage
//! is recorded in `provenance.fallback_stage`, so degradation is always
//! auditable and never silent.
//!
//! Stage semantics:
//! - **Full**: whole tree, workflow snapshot included
//! - **Reduced**: workflow snapshot dropped, parameters and assets intact
//! - **Minimal**: allow-listed reproduction set — prompts, first model with
//!   hash, steps, sampler, cfg, seed, dimensions, and the complete LoRA list
//!   (LoRAs are small and essential, they are never trimmed)
//! - **SidecarPointer**: the full tree goes to a `.json` sidecar next to the
//!   image; the container gets the minimal set minus prompts plus the
//!   sidecar file name
//!
//! A target that fails fatally (handler returns `false`, or nothing fits)
//! produces a failed outcome; the remaining targets still run.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gravure_metadata_contracts::{
    CanonicalMetadata, FallbackStage, MetadataHandler, TargetFormat,
};

/// Per-target result of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub format: TargetFormat,
    pub success: bool,
    /// Stage the write landed on; `None` when no stage fit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<FallbackStage>,
    /// Serialized payload size that was handed to the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dispatches canonical trees to format handlers.
#[derive(Default)]
pub struct MetadataWriterOrchestrator {
    handlers: Vec<Arc<dyn MetadataHandler>>,
}

impl MetadataWriterOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; targets are written in registration order.
    pub fn add_handler(&mut self, handler: Arc<dyn MetadataHandler>) {
        self.handlers.push(handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn MetadataHandler>) -> Self {
        self.add_handler(handler);
        self
    }

    /// Registered handler count.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Write `meta` for the image at `image_path` through every handler.
    ///
    /// The tree is read-only here; per-target filtering happens on copies.
    /// Outcomes are independent: a fatal failure on one target never stops
    /// the others.
    pub fn dispatch(&self, image_path: &Path, meta: &CanonicalMetadata) -> Vec<TargetOutcome> {
        self.handlers
            .iter()
            .map(|handler| {
                let outcome = write_target(handler.as_ref(), image_path, meta);
                if outcome.success {
                    log::debug!(
                        "wrote {} at stage {:?} ({} bytes)",
                        outcome.format,
                        outcome.stage,
                        outcome.payload_bytes.unwrap_or(0)
                    );
                } else {
                    log::warn!(
                        "target {} failed: {}",
                        outcome.format,
                        outcome.error.as_deref().unwrap_or("unknown")
                    );
                }
                outcome
            })
            .collect()
    }
}

/// Run the stage machine for one handler.
fn write_target(
    handler: &dyn MetadataHandler,
    image_path: &Path,
    meta: &CanonicalMetadata,
) -> TargetOutcome {
    let format = handler.format();

    let Some(limit) = handler.size_limit() else {
        // Unconstrained target: the state machine is a no-op.
        let staged = stage_tree(meta, FallbackStage::Full, None);
        let payload_bytes = measure(&staged);
        return finish(handler, image_path, &staged, format, payload_bytes);
    };

    for stage in FallbackStage::ladder() {
        let staged = if stage == FallbackStage::SidecarPointer {
            let sidecar_name = write_full_sidecar(image_path, meta);
            stage_tree(meta, stage, sidecar_name)
        } else {
            stage_tree(meta, stage, None)
        };

        let payload_bytes = measure(&staged);
        if payload_bytes > limit {
            log::debug!(
                "{}: stage {} payload {} exceeds limit {}",
                format,
                stage,
                payload_bytes,
                limit
            );
            continue;
        }
        return finish(handler, image_path, &staged, format, payload_bytes);
    }

    TargetOutcome {
        format,
        success: false,
        stage: None,
        payload_bytes: None,
        error: Some(format!(
            "payload exceeds {}-byte limit at every fallback stage",
            limit
        )),
    }
}

/// Hand the staged tree to the handler and fold its flag into an outcome.
fn finish(
    handler: &dyn MetadataHandler,
    image_path: &Path,
    staged: &CanonicalMetadata,
    format: TargetFormat,
    payload_bytes: usize,
) -> TargetOutcome {
    let success = handler.write(image_path, staged);
    TargetOutcome {
        format,
        success,
        stage: staged.provenance.fallback_stage,
        payload_bytes: Some(payload_bytes),
        error: if success {
            None
        } else {
            Some("handler reported write failure".to_string())
        },
    }
}

/// Canonical-JSON size of the staged tree, which is what constrained
/// handlers embed.
fn measure(staged: &CanonicalMetadata) -> usize {
    serde_json::to_vec(&staged.to_value()).map(|v| v.len()).unwrap_or(usize::MAX)
}

/// Produce the per-stage filtered copy.
fn stage_tree(
    meta: &CanonicalMetadata,
    stage: FallbackStage,
    sidecar: Option<String>,
) -> CanonicalMetadata {
    let mut staged = match stage {
        FallbackStage::Full => meta.clone(),
        FallbackStage::Reduced => {
            let mut copy = meta.clone();
            copy.ai_info.workflow = None;
            copy
        }
        FallbackStage::Minimal => minimal_tree(meta, true),
        FallbackStage::SidecarPointer => minimal_tree(meta, false),
    };
    staged.provenance.fallback_stage = Some(stage);
    if sidecar.is_some() {
        staged.provenance.sidecar = sidecar;
    }
    staged
}

/// The allow-listed reproduction set.
///
/// `include_prompts` is false at the SidecarPointer stage: the prompts live
/// in the sidecar and are usually the bulk of what would not fit.
fn minimal_tree(meta: &CanonicalMetadata, include_prompts: bool) -> CanonicalMetadata {
    let mut minimal = CanonicalMetadata::default();
    let generation = &meta.ai_info.generation;

    let staged_gen = &mut minimal.ai_info.generation;
    if include_prompts {
        staged_gen.positive_prompt = generation.positive_prompt.clone();
        staged_gen.negative_prompt = generation.negative_prompt.clone();
    }
    staged_gen.steps = generation.steps;
    staged_gen.cfg_scale = generation.cfg_scale;
    staged_gen.sampler_name = generation.sampler_name.clone();
    staged_gen.seed = generation.seed;
    staged_gen.width = generation.width;
    staged_gen.height = generation.height;

    if let Some(model) = meta.ai_info.assets.models.first() {
        minimal.ai_info.assets.models.push(model.clone());
    }
    // LoRAs are never trimmed
    minimal.ai_info.assets.loras = meta.ai_info.assets.loras.clone();

    minimal.provenance.save_id = meta.provenance.save_id.clone();
    minimal
}

/// Best-effort write of the untrimmed tree next to the image.
///
/// Returns the sidecar file name to embed as the pointer, or `None` when
/// the write failed (logged, not fatal — the constrained container still
/// gets the compact set).
fn write_full_sidecar(image_path: &Path, meta: &CanonicalMetadata) -> Option<String> {
    let file_name = format!("{}.json", image_path.file_name()?.to_string_lossy());
    let sidecar_path = image_path.with_file_name(&file_name);
    match serde_json::to_vec_pretty(&meta.to_value()) {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(&sidecar_path, bytes) {
                log::warn!(
                    "failed to write full sidecar {}: {}",
                    sidecar_path.display(),
                    err
                );
                None
            } else {
                Some(file_name)
            }
        }
        Err(err) => {
            log::warn!("failed to serialize full sidecar: {}", err);
            None
        }
    }
}
