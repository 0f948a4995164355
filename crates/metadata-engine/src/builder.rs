//! Canonical model construction
//!
//! Deep-merges three inputs into one canonical tree, in fixed precedence
//! order:
//!
//! 1. extractor output, mapped into canonical section paths;
//! 2. inline-tag assets, reconciled against loader-discovered LoRAs by
//!    case-folded name;
//! 3. user-supplied fields, which always win over anything workflow-derived.
//!
//! The merge is idempotent: building again with the produced tree as the
//! user fields and nothing extracted reproduces the tree exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gravure_metadata_contracts::{
    AssetRef, AssetSource, AuditEntry, CanonicalMetadata, ModelRef,
};

use crate::extract::Extraction;
use crate::rules::CaptureField;

/// Which source keeps its strengths when a loader-discovered and an
/// inline-discovered LoRA share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedencePolicy {
    /// The loader entry's strengths stand; the inline sighting is audited
    #[default]
    LoaderWins,
    /// The inline entry's strengths replace the loader's
    InlineWins,
}

/// Builds the canonical tree from pipeline outputs.
#[derive(Debug, Clone, Default)]
pub struct CanonicalModelBuilder {
    policy: PrecedencePolicy,
    generator: Option<String>,
}

impl CanonicalModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the loader-vs-inline precedence policy.
    pub fn with_policy(mut self, policy: PrecedencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name recorded as `provenance.generator` when the user set none.
    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = Some(generator.into());
        self
    }

    /// Merge extractor output, inline assets, and user fields.
    ///
    /// `workflow` is the normalized graph snapshot destined for
    /// `ai_info.workflow`; the orchestrator strips it past the Full stage.
    pub fn build(
        &self,
        extraction: &Extraction,
        inline_assets: &[AssetRef],
        user: &CanonicalMetadata,
        workflow: Option<Value>,
    ) -> CanonicalMetadata {
        let mut audit: Vec<AuditEntry> = Vec::new();

        // 1. Extracted values into canonical paths
        let mut meta = CanonicalMetadata::default();
        self.apply_extraction(&mut meta, extraction, &mut audit);
        meta.ai_info.workflow = workflow;

        // 2. Inline assets reconciled into the LoRA list
        let mut loras = meta.ai_info.assets.loras;
        for incoming in inline_assets {
            merge_lora(&mut loras, incoming, self.policy, &mut audit);
        }
        meta.ai_info.assets.loras = loras;

        // 3. User overlay; user-set fields always win
        overlay_user(&mut meta, user);

        // Audit entries accumulate: derived first, then whatever the user
        // tree already carried (which is how a rebuild preserves history).
        audit.extend(user.provenance.audit.iter().cloned());
        meta.provenance.audit = audit;

        if meta.provenance.generator.is_none() {
            meta.provenance.generator = self.generator.clone();
        }

        meta
    }

    fn apply_extraction(
        &self,
        meta: &mut CanonicalMetadata,
        extraction: &Extraction,
        audit: &mut Vec<AuditEntry>,
    ) {
        let generation = &mut meta.ai_info.generation;
        generation.positive_prompt = extraction
            .get_str(CaptureField::PositivePrompt)
            .map(String::from);
        generation.negative_prompt = extraction
            .get_str(CaptureField::NegativePrompt)
            .map(String::from);
        generation.steps = captured_u32(extraction, CaptureField::Steps);
        generation.cfg_scale = captured_f64(extraction, CaptureField::CfgScale);
        generation.sampler_name = extraction
            .get_str(CaptureField::SamplerName)
            .map(String::from);
        generation.scheduler = extraction.get_str(CaptureField::Scheduler).map(String::from);
        generation.seed = extraction
            .get(CaptureField::Seed)
            .and_then(|c| c.value.as_i64());
        generation.denoise = captured_f64(extraction, CaptureField::Denoise);
        generation.width = captured_u32(extraction, CaptureField::Width);
        generation.height = captured_u32(extraction, CaptureField::Height);

        // Every model candidate is kept, winner first: a refiner chain's
        // second checkpoint is part of what produced the image.
        meta.ai_info.assets.models = extraction
            .candidates(CaptureField::Model)
            .iter()
            .filter_map(|c| parse_model_ref(&c.value))
            .collect();
        meta.ai_info.assets.vae = extraction
            .candidates(CaptureField::Vae)
            .iter()
            .filter_map(|c| parse_model_ref(&c.value))
            .collect();
        meta.ai_info.assets.loras = extraction.loras().to_vec();

        for (field, candidate) in extraction.rejected() {
            audit.push(AuditEntry::RejectedCandidate {
                field: field.as_str().to_string(),
                node_id: candidate.node_id.clone(),
                distance: candidate.distance,
                priority: candidate.priority,
            });
        }
    }
}

/// Reconcile one incoming reference against the accumulated list.
///
/// The existing entry wins a name collision unless the policy says an
/// inline newcomer overrides a loader entry. A collision is only audited
/// when the strengths actually disagree.
fn merge_lora(
    loras: &mut Vec<AssetRef>,
    incoming: &AssetRef,
    policy: PrecedencePolicy,
    audit: &mut Vec<AuditEntry>,
) {
    let key = incoming.normalized_name();
    let Some(existing) = loras.iter_mut().find(|l| l.normalized_name() == key) else {
        loras.push(incoming.clone());
        return;
    };

    let strengths_differ = existing.strength_model != incoming.strength_model
        || existing.strength_clip != incoming.strength_clip;

    let inline_overrides = policy == PrecedencePolicy::InlineWins
        && incoming.source == AssetSource::Inline
        && existing.source == AssetSource::Loader;

    if strengths_differ {
        let (kept, dropped, dropped_model, dropped_clip) = if inline_overrides {
            (
                incoming.source,
                existing.source,
                existing.strength_model,
                existing.strength_clip,
            )
        } else {
            (
                existing.source,
                incoming.source,
                incoming.strength_model,
                incoming.strength_clip,
            )
        };
        audit.push(AuditEntry::StrengthCollision {
            name: incoming.name.clone(),
            kept,
            dropped,
            dropped_strength_model: dropped_model,
            dropped_strength_clip: dropped_clip,
        });
    }

    if inline_overrides {
        existing.strength_model = incoming.strength_model;
        existing.strength_clip = incoming.strength_clip;
    }
    if existing.hash.is_none() {
        existing.hash = incoming.hash.clone();
    }
}

/// Copy every user-set field over the derived tree.
fn overlay_user(meta: &mut CanonicalMetadata, user: &CanonicalMetadata) {
    let basic = &mut meta.basic;
    merge_opt(&mut basic.title, &user.basic.title);
    merge_opt(&mut basic.description, &user.basic.description);
    merge_opt(&mut basic.author, &user.basic.author);
    merge_vec(&mut basic.tags, &user.basic.tags);
    merge_opt(&mut basic.rating, &user.basic.rating);
    merge_opt(&mut basic.notes, &user.basic.notes);

    let class = &mut meta.classification;
    merge_opt(&mut class.category, &user.classification.category);
    merge_vec(&mut class.content_tags, &user.classification.content_tags);
    merge_opt(&mut class.nsfw, &user.classification.nsfw);

    let tech = &mut meta.technical;
    merge_opt(&mut tech.width, &user.technical.width);
    merge_opt(&mut tech.height, &user.technical.height);
    merge_opt(&mut tech.format, &user.technical.format);
    merge_opt(&mut tech.color_space, &user.technical.color_space);
    merge_opt(&mut tech.file_size_bytes, &user.technical.file_size_bytes);

    let generation = &mut meta.ai_info.generation;
    let user_gen = &user.ai_info.generation;
    merge_opt(&mut generation.positive_prompt, &user_gen.positive_prompt);
    merge_opt(&mut generation.negative_prompt, &user_gen.negative_prompt);
    merge_opt(&mut generation.steps, &user_gen.steps);
    merge_opt(&mut generation.cfg_scale, &user_gen.cfg_scale);
    merge_opt(&mut generation.sampler_name, &user_gen.sampler_name);
    merge_opt(&mut generation.scheduler, &user_gen.scheduler);
    merge_opt(&mut generation.seed, &user_gen.seed);
    merge_opt(&mut generation.denoise, &user_gen.denoise);
    merge_opt(&mut generation.width, &user_gen.width);
    merge_opt(&mut generation.height, &user_gen.height);

    let assets = &mut meta.ai_info.assets;
    let user_assets = &user.ai_info.assets;
    merge_vec(&mut assets.models, &user_assets.models);
    merge_vec(&mut assets.vae, &user_assets.vae);
    merge_vec(&mut assets.loras, &user_assets.loras);
    merge_vec(&mut assets.controlnets, &user_assets.controlnets);
    merge_vec(&mut assets.embeddings, &user_assets.embeddings);

    merge_opt(&mut meta.ai_info.workflow, &user.ai_info.workflow);
    merge_opt(&mut meta.ai_info.analysis, &user.ai_info.analysis);

    let prov = &mut meta.provenance;
    let user_prov = &user.provenance;
    merge_opt(&mut prov.generator, &user_prov.generator);
    merge_opt(&mut prov.save_id, &user_prov.save_id);
    merge_opt(&mut prov.saved_at, &user_prov.saved_at);
    merge_opt(&mut prov.fallback_stage, &user_prov.fallback_stage);
    merge_opt(&mut prov.sidecar, &user_prov.sidecar);
}

/// A set user value replaces the derived one; unset leaves it alone.
fn merge_opt<T: Clone>(derived: &mut Option<T>, user: &Option<T>) {
    if let Some(value) = user {
        *derived = Some(value.clone());
    }
}

/// A non-empty user list replaces the derived one wholesale.
fn merge_vec<T: Clone>(derived: &mut Vec<T>, user: &[T]) {
    if !user.is_empty() {
        *derived = user.to_vec();
    }
}

fn captured_u32(extraction: &Extraction, field: CaptureField) -> Option<u32> {
    extraction
        .get(field)
        .and_then(|c| c.value.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

fn captured_f64(extraction: &Extraction, field: CaptureField) -> Option<f64> {
    extraction.get(field).and_then(|c| c.value.as_f64())
}

/// The digest formatter leaves `{name, hash}`; unformatted captures leave a
/// bare string.
fn parse_model_ref(value: &Value) -> Option<ModelRef> {
    match value {
        Value::Object(obj) => {
            let name = obj.get("name")?.as_str()?;
            let mut model = ModelRef::new(name);
            if let Some(hash) = obj.get("hash").and_then(Value::as_str) {
                model = model.with_hash(hash);
            }
            Some(model)
        }
        Value::String(name) => Some(ModelRef::new(name)),
        _ => None,
    }
}
