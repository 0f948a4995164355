//! Metadata Engine — workflow-graph metadata aggregation for Gravure
//!
//! This crate turns a raw node-graph workflow document into one canonical
//! metadata tree and dispatches that tree to format handlers:
//!
//! - `graph`: normalize the host's raw JSON into a node lookup table
//! - `trace`: backward BFS distance labeling from a save node
//! - `rules` + `extract`: declarative capture rules applied over the trace
//! - `inline`: LoRA references embedded directly in prompt text
//! - `hash_cache`: sidecar-memoized SHA-256 digests of asset files
//! - `builder`: deep merge of extracted, inline, and user-supplied values
//! - `orchestrator`: per-target dispatch with staged size fallback
//!
//! The pipeline is a linear, synchronous pass per save operation; all state
//! flows through explicit values, never module-level globals. Metadata
//! collection is non-fatal by policy: malformed nodes, unreadable assets,
//! and oversized payloads degrade locally and never abort an image save.

pub mod builder;
pub mod error;
pub mod extract;
pub mod graph;
pub mod hash_cache;
pub mod inline;
pub mod orchestrator;
pub mod rules;
pub mod trace;

pub use builder::{CanonicalModelBuilder, PrecedencePolicy};
pub use error::{MetadataEngineError, Result};
pub use extract::{CapturedValue, Extraction, FieldExtractor};
pub use graph::{ConnectionRef, NodeId, NodeInput, WorkflowGraph, WorkflowNode, UNKNOWN_TYPE_TAG};
pub use hash_cache::HashCache;
pub use inline::parse_inline_tags;
pub use orchestrator::{MetadataWriterOrchestrator, TargetOutcome};
pub use rules::{
    CaptureField, CaptureRule, FormatContext, Formatter, RuleRegistry, RuleSetFn, Validator,
    ValidatorCtx,
};
pub use trace::{TraceResult, TracedNode};

// Re-export the contract types consumers pair with this engine
pub use gravure_metadata_contracts::{
    AssetRef, AssetSource, CanonicalMetadata, FallbackStage, MetadataHandler, TargetFormat,
};
