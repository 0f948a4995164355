//! Declarative field extraction over a trace
//!
//! For every node the backward trace reached, the extractor looks up capture
//! rules by type tag and pulls raw input values through them. Nodes with no
//! exact rules but a sampler-shaped input signature (step count plus guidance
//! scale) are admitted as heuristic candidates at a lower priority.
//!
//! When several nodes supply the same logical field — base plus refiner
//! sampler chains are the common case — candidates are ordered by
//! `(priority, distance, node id)`: an exact-type match always beats a
//! heuristic one, nearer nodes beat farther ones, and the node id breaks
//! remaining ties so repeated saves of one graph stay deterministic. The
//! losing candidates are retained for audit.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use gravure_metadata_contracts::AssetRef;

use crate::graph::{NodeId, WorkflowGraph};
use crate::hash_cache::HashCache;
use crate::rules::{
    heuristic_sampler_rules, is_sampler_like, CaptureField, CaptureRule, FormatContext,
    RuleRegistry, ValidatorCtx,
};
use crate::trace::TraceResult;

/// A value captured from one node, with enough context to rank it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedValue {
    pub value: Value,
    pub node_id: NodeId,
    pub distance: u32,
    /// 0 for exact type-tag rules, 1 for heuristic sampler matches
    pub priority: u8,
}

/// The extractor's output: winning values per logical field, the full
/// candidate lists for audit, and the loader-discovered LoRA stack.
#[derive(Debug, Default)]
pub struct Extraction {
    winners: HashMap<CaptureField, CapturedValue>,
    candidates: HashMap<CaptureField, Vec<CapturedValue>>,
    loras: Vec<AssetRef>,
}

impl Extraction {
    /// The winning capture for a field, if any node supplied it.
    pub fn get(&self, field: CaptureField) -> Option<&CapturedValue> {
        self.winners.get(&field)
    }

    /// Winning value coerced to a string.
    pub fn get_str(&self, field: CaptureField) -> Option<&str> {
        self.get(field).and_then(|c| c.value.as_str())
    }

    /// All candidates for a field, winner first.
    pub fn candidates(&self, field: CaptureField) -> &[CapturedValue] {
        self.candidates.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Losing candidates across all fields, for the audit channel.
    pub fn rejected(&self) -> Vec<(CaptureField, &CapturedValue)> {
        let mut rejected: Vec<(CaptureField, &CapturedValue)> = self
            .candidates
            .iter()
            .flat_map(|(field, list)| list.iter().skip(1).map(move |c| (*field, c)))
            .collect();
        rejected.sort_by(|a, b| {
            (a.0.as_str(), &a.1.node_id).cmp(&(b.0.as_str(), &b.1.node_id))
        });
        rejected
    }

    /// Loader-discovered LoRA references, nearest node first.
    pub fn loras(&self) -> &[AssetRef] {
        &self.loras
    }
}

/// Applies a rule registry to a traced graph.
pub struct FieldExtractor<'a> {
    registry: &'a RuleRegistry,
    hash_cache: &'a HashCache,
    asset_roots: &'a [PathBuf],
}

impl<'a> FieldExtractor<'a> {
    pub fn new(
        registry: &'a RuleRegistry,
        hash_cache: &'a HashCache,
        asset_roots: &'a [PathBuf],
    ) -> Self {
        Self {
            registry,
            hash_cache,
            asset_roots,
        }
    }

    /// Resolve an asset file name to its content digest.
    ///
    /// Exposed so inline-tag references can be enriched with the same cache
    /// the loader formatters use.
    pub fn resolve_asset_digest(&self, name: &str) -> Option<String> {
        FormatContext {
            hash_cache: self.hash_cache,
            asset_roots: self.asset_roots,
        }
        .resolve_asset_digest(name)
    }

    /// Run every applicable rule over every traced node.
    pub fn extract(&self, trace: &TraceResult, graph: &WorkflowGraph) -> Extraction {
        let fmt_ctx = FormatContext {
            hash_cache: self.hash_cache,
            asset_roots: self.asset_roots,
        };
        let heuristic = heuristic_sampler_rules();

        let mut candidates: HashMap<CaptureField, Vec<CapturedValue>> = HashMap::new();
        // (distance, node_id, reference) so the stack can be ordered later
        let mut lora_rows: Vec<(u32, NodeId, AssetRef)> = Vec::new();

        for (node_id, traced) in trace.iter() {
            let Some(node) = graph.get(node_id) else {
                continue;
            };

            let (rules, priority): (&[CaptureRule], u8) =
                match self.registry.rules_for(&traced.type_tag) {
                    Some(rules) => (rules, 0),
                    None if is_sampler_like(node) => (heuristic.as_slice(), 1),
                    None => continue,
                };

            let mut lora_parts: HashMap<CaptureField, Value> = HashMap::new();
            for rule in rules {
                let Some(raw) = node.input_literal(&rule.input_name) else {
                    continue;
                };
                if let Some(validator) = &rule.validator {
                    let ctx = ValidatorCtx {
                        node_id,
                        graph,
                        trace,
                    };
                    if !validator(node, &ctx) {
                        continue;
                    }
                }
                let value = match &rule.formatter {
                    Some(formatter) => formatter(raw.clone(), &fmt_ctx),
                    None => raw.clone(),
                };

                if rule.field.is_lora_component() {
                    lora_parts.insert(rule.field, value);
                } else {
                    candidates.entry(rule.field).or_default().push(CapturedValue {
                        value,
                        node_id: node_id.clone(),
                        distance: traced.distance,
                        priority,
                    });
                }
            }

            if let Some(asset) = assemble_lora(&lora_parts) {
                lora_rows.push((traced.distance, node_id.clone(), asset));
            }
        }

        for list in candidates.values_mut() {
            list.sort_by(|a, b| {
                (a.priority, a.distance, &a.node_id).cmp(&(b.priority, b.distance, &b.node_id))
            });
        }
        let winners = candidates
            .iter()
            .filter_map(|(field, list)| list.first().map(|c| (*field, c.clone())))
            .collect();

        lora_rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        let loras = lora_rows.into_iter().map(|(_, _, asset)| asset).collect();

        Extraction {
            winners,
            candidates,
            loras,
        }
    }
}

/// Combine per-node LoRA component captures into one loader reference.
fn assemble_lora(parts: &HashMap<CaptureField, Value>) -> Option<AssetRef> {
    let name_value = parts.get(&CaptureField::LoraName)?;
    // The digest formatter wraps the name in an object; an unformatted rule
    // leaves a bare string.
    let (name, hash) = match name_value {
        Value::Object(obj) => (
            obj.get("name")?.as_str()?.to_string(),
            obj.get("hash").and_then(Value::as_str).map(String::from),
        ),
        Value::String(name) => (name.clone(), None),
        _ => return None,
    };

    let strength_model = parts
        .get(&CaptureField::LoraStrengthModel)
        .and_then(Value::as_f64)
        .unwrap_or(1.0);
    let strength_clip = parts
        .get(&CaptureField::LoraStrengthClip)
        .and_then(Value::as_f64)
        .unwrap_or(strength_model);

    let mut asset = AssetRef::loader(name, strength_model, strength_clip);
    if let Some(hash) = hash {
        asset = asset.with_hash(hash);
    }
    Some(asset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(raw: serde_json::Value, sink: &str) -> Extraction {
        let graph = WorkflowGraph::parse(&raw).unwrap();
        let trace = TraceResult::trace(sink, &graph).unwrap();
        let registry = RuleRegistry::with_builtins();
        let cache = HashCache::new();
        let extractor = FieldExtractor::new(&registry, &cache, &[]);
        extractor.extract(&trace, &graph)
    }

    #[test]
    fn test_sampler_fields_extracted() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["s", 0]}},
                "s": {"type_tag": "KSampler", "inputs": {
                    "steps": 20, "cfg": 7.0, "sampler_name": "euler",
                    "scheduler": "normal", "seed": 42, "denoise": 1.0
                }}
            }),
            "save",
        );
        assert_eq!(extraction.get(CaptureField::Steps).unwrap().value, json!(20));
        assert_eq!(extraction.get_str(CaptureField::SamplerName), Some("euler"));
        assert_eq!(extraction.get(CaptureField::Seed).unwrap().value, json!(42));
    }

    #[test]
    fn test_nearer_sampler_wins_farther_retained() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["near", 0]}},
                "near": {"type_tag": "KSampler", "inputs": {
                    "steps": 12, "cfg": 7.0, "latent": ["mid", 0]
                }},
                "mid": {"type_tag": "Unknown", "inputs": {"in": ["far", 0]}},
                "far": {"type_tag": "KSampler", "inputs": {"steps": 30, "cfg": 8.0}}
            }),
            "save",
        );
        let winner = extraction.get(CaptureField::Steps).unwrap();
        assert_eq!(winner.value, json!(12));
        assert_eq!(winner.node_id, "near");
        // Refiner-style runner-up kept for audit
        assert_eq!(extraction.candidates(CaptureField::Steps).len(), 2);
        let rejected = extraction.rejected();
        assert!(rejected
            .iter()
            .any(|(field, c)| *field == CaptureField::Steps && c.node_id == "far"));
    }

    #[test]
    fn test_exact_type_beats_nearer_heuristic() {
        // Heuristic sampler at distance 1, exact KSampler at distance 2
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["h", 0]}},
                "h": {"type_tag": "MysterySampler", "inputs": {
                    "steps": 99, "cfg": 1.0, "in": ["k", 0]
                }},
                "k": {"type_tag": "KSampler", "inputs": {"steps": 20, "cfg": 7.0}}
            }),
            "save",
        );
        let winner = extraction.get(CaptureField::Steps).unwrap();
        assert_eq!(winner.node_id, "k");
        assert_eq!(winner.priority, 0);
        assert_eq!(winner.value, json!(20));
    }

    #[test]
    fn test_heuristic_sampler_admitted_without_rules() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["m", 0]}},
                "m": {"type_tag": "MysterySampler", "inputs": {
                    "steps": 15, "cfg": 5.5, "noise_seed": 7
                }}
            }),
            "save",
        );
        assert_eq!(extraction.get(CaptureField::Steps).unwrap().priority, 1);
        assert_eq!(extraction.get(CaptureField::Seed).unwrap().value, json!(7));
        assert_eq!(
            extraction.get(CaptureField::CfgScale).unwrap().value,
            json!(5.5)
        );
    }

    #[test]
    fn test_prompt_polarity_follows_conditioning_chain() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["s", 0]}},
                "s": {"type_tag": "KSampler", "inputs": {
                    "steps": 20, "cfg": 7.0,
                    "positive": ["p", 0], "negative": ["n", 0]
                }},
                "p": {"type_tag": "CLIPTextEncode", "inputs": {"text": "masterpiece"}},
                "n": {"type_tag": "CLIPTextEncode", "inputs": {"text": "blurry"}}
            }),
            "save",
        );
        assert_eq!(
            extraction.get_str(CaptureField::PositivePrompt),
            Some("masterpiece")
        );
        assert_eq!(
            extraction.get_str(CaptureField::NegativePrompt),
            Some("blurry")
        );
    }

    #[test]
    fn test_lora_stack_collected_in_chain_order() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {"images": ["l1", 0]}},
                "l1": {"type_tag": "LoraLoader", "inputs": {
                    "lora_name": "near.safetensors",
                    "strength_model": 0.8, "strength_clip": 0.6,
                    "model": ["l2", 0]
                }},
                "l2": {"type_tag": "LoraLoader", "inputs": {
                    "lora_name": "far.safetensors", "strength_model": 0.5
                }}
            }),
            "save",
        );
        let loras = extraction.loras();
        assert_eq!(loras.len(), 2);
        assert_eq!(loras[0].name, "near.safetensors");
        assert_eq!(loras[0].strength_model, 0.8);
        assert_eq!(loras[0].strength_clip, 0.6);
        assert_eq!(loras[1].name, "far.safetensors");
        // Missing clip strength falls back to the model strength
        assert_eq!(loras[1].strength_clip, 0.5);
    }

    #[test]
    fn test_unreached_nodes_do_not_contribute() {
        let extraction = extract(
            json!({
                "save": {"type_tag": "SaveImage", "inputs": {}},
                "island": {"type_tag": "KSampler", "inputs": {"steps": 20, "cfg": 7.0}}
            }),
            "save",
        );
        assert!(extraction.get(CaptureField::Steps).is_none());
    }
}
