//! Capture rule registry
//!
//! Extraction is driven by data, not code branches: each node type tag maps
//! to a list of [`CaptureRule`]s naming which input to pull and which logical
//! field it feeds, with optional validator and formatter closures. Adding
//! support for a new node type means registering a new rule set, never adding
//! a match arm.
//!
//! Built-in rule sets are collected at link time through `inventory`;
//! [`RuleRegistry::with_builtins`] gathers every submitted set. Host plugins
//! can register additional sets or merge whole registries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::graph::{WorkflowGraph, WorkflowNode};
use crate::hash_cache::HashCache;
use crate::trace::TraceResult;

/// Logical fields a capture rule can feed.
///
/// The three `Lora*` components are grouped per node by the extractor into
/// one asset reference; all other fields are scalar candidates subject to
/// tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureField {
    Model,
    Vae,
    PositivePrompt,
    NegativePrompt,
    Steps,
    CfgScale,
    SamplerName,
    Scheduler,
    Seed,
    Denoise,
    Width,
    Height,
    LoraName,
    LoraStrengthModel,
    LoraStrengthClip,
}

impl CaptureField {
    /// Stable name used in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Vae => "vae",
            Self::PositivePrompt => "positive_prompt",
            Self::NegativePrompt => "negative_prompt",
            Self::Steps => "steps",
            Self::CfgScale => "cfg_scale",
            Self::SamplerName => "sampler_name",
            Self::Scheduler => "scheduler",
            Self::Seed => "seed",
            Self::Denoise => "denoise",
            Self::Width => "width",
            Self::Height => "height",
            Self::LoraName => "lora_name",
            Self::LoraStrengthModel => "lora_strength_model",
            Self::LoraStrengthClip => "lora_strength_clip",
        }
    }

    /// Whether this field is one component of a LoRA reference.
    pub fn is_lora_component(&self) -> bool {
        matches!(
            self,
            Self::LoraName | Self::LoraStrengthModel | Self::LoraStrengthClip
        )
    }
}

impl std::fmt::Display for CaptureField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to validators: the node under consideration plus the whole
/// trace and graph, so a rule can inspect neighboring nodes.
pub struct ValidatorCtx<'a> {
    /// Id of the node the rule is being applied to
    pub node_id: &'a str,
    pub graph: &'a WorkflowGraph,
    pub trace: &'a TraceResult,
}

/// Context handed to formatters, used chiefly to resolve asset file names to
/// content digests.
pub struct FormatContext<'a> {
    pub hash_cache: &'a HashCache,
    pub asset_roots: &'a [PathBuf],
}

impl FormatContext<'_> {
    /// Resolve an asset file name against the configured roots and return
    /// its digest, if the file exists and is readable.
    pub fn resolve_asset_digest(&self, name: &str) -> Option<String> {
        for root in self.asset_roots {
            let candidate = root.join(name);
            if candidate.is_file() {
                return self.hash_cache.digest(&candidate);
            }
        }
        log::debug!("asset '{}' not found under any configured root", name);
        None
    }
}

/// Predicate deciding whether a rule applies to a node in context.
pub type Validator = Arc<dyn Fn(&WorkflowNode, &ValidatorCtx<'_>) -> bool + Send + Sync>;

/// Transformation applied to a raw captured value.
pub type Formatter = Arc<dyn Fn(Value, &FormatContext<'_>) -> Value + Send + Sync>;

/// One declarative capture: which node input feeds which logical field.
#[derive(Clone)]
pub struct CaptureRule {
    pub field: CaptureField,
    /// Name of the node input the raw value is read from
    pub input_name: String,
    pub validator: Option<Validator>,
    pub formatter: Option<Formatter>,
}

impl CaptureRule {
    pub fn new(field: CaptureField, input_name: impl Into<String>) -> Self {
        Self {
            field,
            input_name: input_name.into(),
            validator: None,
            formatter: None,
        }
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&WorkflowNode, &ValidatorCtx<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_formatter(
        mut self,
        formatter: impl Fn(Value, &FormatContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.formatter = Some(Arc::new(formatter));
        self
    }
}

impl std::fmt::Debug for CaptureRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureRule")
            .field("field", &self.field)
            .field("input_name", &self.input_name)
            .field("validator", &self.validator.is_some())
            .field("formatter", &self.formatter.is_some())
            .finish()
    }
}

/// A function contributing built-in capture rules, collected at link time.
///
/// Each entry pairs a node type tag with one rule for that tag.
pub struct RuleSetFn(pub fn() -> Vec<(&'static str, CaptureRule)>);

inventory::collect!(RuleSetFn);

/// Registry of capture rules keyed by node type tag.
#[derive(Default)]
pub struct RuleRegistry {
    rules: HashMap<String, Vec<CaptureRule>>,
}

impl RuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every link-time-submitted built-in rule set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for set in inventory::iter::<RuleSetFn> {
            for (type_tag, rule) in (set.0)() {
                registry.register(type_tag, rule);
            }
        }
        registry
    }

    /// Register a rule for a node type tag.
    pub fn register(&mut self, type_tag: impl Into<String>, rule: CaptureRule) {
        self.rules.entry(type_tag.into()).or_default().push(rule);
    }

    /// Rules registered for a type tag, if any.
    pub fn rules_for(&self, type_tag: &str) -> Option<&[CaptureRule]> {
        self.rules.get(type_tag).map(Vec::as_slice)
    }

    /// Whether any rule exists for the type tag.
    pub fn has_type_tag(&self, type_tag: &str) -> bool {
        self.rules.contains_key(type_tag)
    }

    /// All registered type tags.
    pub fn type_tags(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }

    /// Merge another registry into this one; rules accumulate per tag.
    pub fn merge(&mut self, other: RuleRegistry) {
        for (tag, rules) in other.rules {
            self.rules.entry(tag).or_default().extend(rules);
        }
    }
}

/// A node that exposes both a step count and a guidance scale is treated as
/// a sampler even when its exact type tag has no registered rules.
pub fn is_sampler_like(node: &WorkflowNode) -> bool {
    node.has_input("steps") && node.has_input("cfg")
}

/// Rules applied to heuristic sampler candidates (priority 1).
///
/// Conventional input names only; whichever of them the node actually
/// exposes get captured.
pub fn heuristic_sampler_rules() -> Vec<CaptureRule> {
    vec![
        CaptureRule::new(CaptureField::Steps, "steps"),
        CaptureRule::new(CaptureField::CfgScale, "cfg"),
        CaptureRule::new(CaptureField::SamplerName, "sampler_name"),
        CaptureRule::new(CaptureField::Scheduler, "scheduler"),
        CaptureRule::new(CaptureField::Seed, "seed"),
        CaptureRule::new(CaptureField::Seed, "noise_seed"),
        CaptureRule::new(CaptureField::Denoise, "denoise"),
    ]
}

/// Walk backward from `start`, following every wired input, and report
/// whether `target` is reachable. Cycle-safe via the visited set.
fn backward_reaches(graph: &WorkflowGraph, start: &str, target: &str) -> bool {
    if start == target {
        return true;
    }
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);
    while let Some(id) = queue.pop_front() {
        let Some(node) = graph.get(id) else { continue };
        for conn in node.connections() {
            let parent = conn.node_id.as_str();
            if parent == target {
                return true;
            }
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    false
}

/// Whether the node under validation feeds the named conditioning input of
/// any sampler in the trace.
fn feeds_conditioning_slot(ctx: &ValidatorCtx<'_>, slot: &str) -> bool {
    for (id, _) in ctx.trace.iter() {
        let Some(node) = ctx.graph.get(id) else {
            continue;
        };
        if !is_sampler_like(node) {
            continue;
        }
        if let Some(conn) = node.input_connection(slot) {
            if backward_reaches(ctx.graph, &conn.node_id, ctx.node_id) {
                return true;
            }
        }
    }
    false
}

/// Wrap a model/LoRA file name with its resolved digest.
fn attach_digest(value: Value, ctx: &FormatContext<'_>) -> Value {
    let Some(name) = value.as_str() else {
        return value;
    };
    match ctx.resolve_asset_digest(name) {
        Some(hash) => serde_json::json!({ "name": name, "hash": hash }),
        None => serde_json::json!({ "name": name }),
    }
}

// --- Built-in rule sets -------------------------------------------------

fn sampler_rules() -> Vec<(&'static str, CaptureRule)> {
    let mut rules = Vec::new();
    for tag in ["KSampler", "KSamplerAdvanced"] {
        rules.push((tag, CaptureRule::new(CaptureField::Steps, "steps")));
        rules.push((tag, CaptureRule::new(CaptureField::CfgScale, "cfg")));
        rules.push((
            tag,
            CaptureRule::new(CaptureField::SamplerName, "sampler_name"),
        ));
        rules.push((tag, CaptureRule::new(CaptureField::Scheduler, "scheduler")));
        rules.push((tag, CaptureRule::new(CaptureField::Denoise, "denoise")));
    }
    rules.push(("KSampler", CaptureRule::new(CaptureField::Seed, "seed")));
    rules.push((
        "KSamplerAdvanced",
        CaptureRule::new(CaptureField::Seed, "noise_seed"),
    ));
    rules
}

inventory::submit!(RuleSetFn(sampler_rules));

fn loader_rules() -> Vec<(&'static str, CaptureRule)> {
    vec![
        (
            "CheckpointLoaderSimple",
            CaptureRule::new(CaptureField::Model, "ckpt_name").with_formatter(attach_digest),
        ),
        (
            "VAELoader",
            CaptureRule::new(CaptureField::Vae, "vae_name").with_formatter(attach_digest),
        ),
        (
            "LoraLoader",
            CaptureRule::new(CaptureField::LoraName, "lora_name").with_formatter(attach_digest),
        ),
        (
            "LoraLoader",
            CaptureRule::new(CaptureField::LoraStrengthModel, "strength_model"),
        ),
        (
            "LoraLoader",
            CaptureRule::new(CaptureField::LoraStrengthClip, "strength_clip"),
        ),
    ]
}

inventory::submit!(RuleSetFn(loader_rules));

fn prompt_rules() -> Vec<(&'static str, CaptureRule)> {
    vec![
        (
            "CLIPTextEncode",
            CaptureRule::new(CaptureField::PositivePrompt, "text")
                .with_validator(|_, ctx| feeds_conditioning_slot(ctx, "positive")),
        ),
        (
            "CLIPTextEncode",
            CaptureRule::new(CaptureField::NegativePrompt, "text").with_validator(|_, ctx| {
                // Reached only through the negative conditioning chain; a
                // text node shared by both chains counts as positive.
                feeds_conditioning_slot(ctx, "negative")
                    && !feeds_conditioning_slot(ctx, "positive")
            }),
        ),
    ]
}

inventory::submit!(RuleSetFn(prompt_rules));

fn latent_rules() -> Vec<(&'static str, CaptureRule)> {
    vec![
        (
            "EmptyLatentImage",
            CaptureRule::new(CaptureField::Width, "width"),
        ),
        (
            "EmptyLatentImage",
            CaptureRule::new(CaptureField::Height, "height"),
        ),
    ]
}

inventory::submit!(RuleSetFn(latent_rules));

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_builtins_collects_submitted_sets() {
        let registry = RuleRegistry::with_builtins();
        assert!(registry.has_type_tag("KSampler"));
        assert!(registry.has_type_tag("LoraLoader"));
        assert!(registry.has_type_tag("CLIPTextEncode"));
        assert!(registry.has_type_tag("EmptyLatentImage"));
        assert!(!registry.has_type_tag("Unknown"));
    }

    #[test]
    fn test_register_and_merge_accumulate() {
        let mut a = RuleRegistry::new();
        a.register("Custom", CaptureRule::new(CaptureField::Steps, "steps"));
        let mut b = RuleRegistry::new();
        b.register("Custom", CaptureRule::new(CaptureField::Seed, "seed"));
        a.merge(b);
        assert_eq!(a.rules_for("Custom").unwrap().len(), 2);
    }

    #[test]
    fn test_sampler_like_heuristic() {
        let graph = WorkflowGraph::parse(&json!({
            "1": {"type_tag": "MysterySampler", "inputs": {"steps": 20, "cfg": 7.0}},
            "2": {"type_tag": "NotASampler", "inputs": {"steps": 20}}
        }))
        .unwrap();
        assert!(is_sampler_like(graph.get("1").unwrap()));
        assert!(!is_sampler_like(graph.get("2").unwrap()));
    }

    #[test]
    fn test_backward_reaches_handles_cycles() {
        let graph = WorkflowGraph::parse(&json!({
            "A": {"type_tag": "T", "inputs": {"in": ["B", 0]}},
            "B": {"type_tag": "T", "inputs": {"in": ["A", 0]}},
            "C": {"type_tag": "T", "inputs": {}}
        }))
        .unwrap();
        assert!(backward_reaches(&graph, "A", "B"));
        assert!(!backward_reaches(&graph, "A", "C"));
    }

    #[test]
    fn test_conditioning_validators_split_prompts() {
        let raw = json!({
            "save": {"type_tag": "SaveImage", "inputs": {"images": ["sampler", 0]}},
            "sampler": {"type_tag": "KSampler", "inputs": {
                "steps": 20, "cfg": 7.0,
                "positive": ["pos", 0],
                "negative": ["neg", 0]
            }},
            "pos": {"type_tag": "CLIPTextEncode", "inputs": {"text": "good"}},
            "neg": {"type_tag": "CLIPTextEncode", "inputs": {"text": "bad"}}
        });
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let trace = TraceResult::trace("save", &graph).unwrap();

        let pos_ctx = ValidatorCtx {
            node_id: "pos",
            graph: &graph,
            trace: &trace,
        };
        let neg_ctx = ValidatorCtx {
            node_id: "neg",
            graph: &graph,
            trace: &trace,
        };
        assert!(feeds_conditioning_slot(&pos_ctx, "positive"));
        assert!(!feeds_conditioning_slot(&pos_ctx, "negative"));
        assert!(feeds_conditioning_slot(&neg_ctx, "negative"));
    }

    #[test]
    fn test_attach_digest_without_roots_keeps_name() {
        let cache = HashCache::new();
        let ctx = FormatContext {
            hash_cache: &cache,
            asset_roots: &[],
        };
        let out = attach_digest(json!("model.safetensors"), &ctx);
        assert_eq!(out, json!({"name": "model.safetensors"}));
    }
}
