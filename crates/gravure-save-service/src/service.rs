//! The save pipeline service
//!
//! Wires the engine stages into one host-agnostic entry point: normalize the
//! workflow document, pick the sink(s), trace backward, extract fields and
//! inline tags, build the canonical tree, and dispatch it to every
//! configured target. All per-save state lives in locals flowing through the
//! pipeline; the service itself holds only the registry, the hash cache, and
//! the handler set, all safe to share across concurrent batch saves.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use gravure_metadata_contracts::{CanonicalMetadata, TargetFormat};
use metadata_engine::{
    parse_inline_tags, CanonicalModelBuilder, CaptureField, FieldExtractor, HashCache,
    MetadataEngineError, MetadataWriterOrchestrator, RuleRegistry, TargetOutcome, TraceResult,
    WorkflowGraph,
};
use metadata_handlers::{
    HandlerError, JpegCommentHandler, JsonSidecarHandler, SqliteIndexHandler, TextReportHandler,
    XmpSidecarHandler,
};

use crate::config::SaveConfig;

/// Result type alias using SaveServiceError
pub type Result<T> = std::result::Result<T, SaveServiceError>;

/// Errors surfaced by the save service.
///
/// Per-target write failures are not errors — they are reported per target
/// in the [`SaveReport`]. Only request-level misuse and service construction
/// problems surface here.
#[derive(Debug, Error)]
pub enum SaveServiceError {
    /// The workflow has no save node and the request named none
    #[error("workflow contains no save node and no sink was named")]
    NoSinkFound,

    /// Configuration problem detected at construction
    #[error("configuration error: {0}")]
    Config(String),

    /// Engine-level failure (unparseable document, unknown sink)
    #[error(transparent)]
    Engine(#[from] MetadataEngineError),

    /// Handler construction failure (database open)
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A batch worker could not be joined
    #[error("batch task failed: {0}")]
    BatchJoin(String),
}

/// One image save to perform.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// The image file the metadata belongs to
    pub image_path: PathBuf,
    /// Raw workflow document from the host
    pub workflow: serde_json::Value,
    /// Explicit sink node id; `None` auto-discovers save nodes
    pub sink_id: Option<String>,
    /// User-supplied fields, overlaid with highest precedence
    pub user_fields: CanonicalMetadata,
}

impl SaveRequest {
    pub fn new(image_path: impl Into<PathBuf>, workflow: serde_json::Value) -> Self {
        Self {
            image_path: image_path.into(),
            workflow,
            sink_id: None,
            user_fields: CanonicalMetadata::default(),
        }
    }

    /// Name the sink explicitly instead of auto-discovering.
    pub fn with_sink(mut self, sink_id: impl Into<String>) -> Self {
        self.sink_id = Some(sink_id.into());
        self
    }

    /// Attach user-supplied fields.
    pub fn with_user_fields(mut self, user_fields: CanonicalMetadata) -> Self {
        self.user_fields = user_fields;
        self
    }
}

/// Result of one save operation for one sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveReport {
    /// Shared by every target of this save
    pub save_id: String,
    pub image_path: PathBuf,
    /// The sink this report's trace started from
    pub sink_id: String,
    /// Per-target outcomes, in configured write order
    pub targets: Vec<TargetOutcome>,
}

impl SaveReport {
    /// Whether every target wrote successfully.
    pub fn all_succeeded(&self) -> bool {
        self.targets.iter().all(|t| t.success)
    }

    /// Outcome for one target format, if it was configured.
    pub fn target(&self, format: TargetFormat) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.format == format)
    }
}

/// Host-agnostic save pipeline.
pub struct SaveService {
    config: SaveConfig,
    registry: RuleRegistry,
    hash_cache: HashCache,
    orchestrator: MetadataWriterOrchestrator,
}

impl SaveService {
    /// Build a service from configuration, constructing one handler per
    /// configured target.
    pub fn new(config: SaveConfig) -> Result<Self> {
        let mut orchestrator = MetadataWriterOrchestrator::new();
        for target in &config.targets {
            match target {
                TargetFormat::EmbeddedImage => {
                    orchestrator.add_handler(Arc::new(JpegCommentHandler::new()));
                }
                TargetFormat::XmpSidecar => {
                    orchestrator.add_handler(Arc::new(XmpSidecarHandler::new()));
                }
                TargetFormat::JsonSidecar => {
                    orchestrator.add_handler(Arc::new(JsonSidecarHandler::new()));
                }
                TargetFormat::TextReport => {
                    orchestrator.add_handler(Arc::new(TextReportHandler::new()));
                }
                TargetFormat::DatabaseIndex => {
                    let path = config.database_path.as_ref().ok_or_else(|| {
                        SaveServiceError::Config(
                            "database target configured without a database path".to_string(),
                        )
                    })?;
                    orchestrator.add_handler(Arc::new(SqliteIndexHandler::new(path)?));
                }
            }
        }

        Ok(Self {
            config,
            registry: RuleRegistry::with_builtins(),
            hash_cache: HashCache::new(),
            orchestrator,
        })
    }

    /// Extend the built-in capture rules, e.g. with host-plugin node types.
    pub fn with_registry(mut self, registry: RuleRegistry) -> Self {
        self.registry.merge(registry);
        self
    }

    /// Run the save pipeline for one request.
    ///
    /// Produces one report per sink: a request without an explicit sink id
    /// gets every save node the graph contains. Per-target failures land in
    /// the reports; `Err` is reserved for request-level misuse.
    pub fn save(&self, request: &SaveRequest) -> Result<Vec<SaveReport>> {
        let graph = WorkflowGraph::parse(&request.workflow)?;

        let sinks: Vec<String> = match &request.sink_id {
            Some(id) => vec![id.clone()],
            None => graph
                .sink_candidates()
                .into_iter()
                .cloned()
                .collect(),
        };
        if sinks.is_empty() {
            return Err(SaveServiceError::NoSinkFound);
        }

        sinks
            .iter()
            .map(|sink_id| self.run_pipeline(&graph, sink_id, request))
            .collect()
    }

    /// Run many saves concurrently, one pipeline per image.
    ///
    /// Pipelines execute on the blocking pool; shared state (hash sidecars,
    /// the database connection) is lock-protected inside the handlers, so
    /// requests need no coordination. Outcomes are returned in request
    /// order.
    pub async fn save_batch(
        self: &Arc<Self>,
        requests: Vec<SaveRequest>,
    ) -> Vec<Result<Vec<SaveReport>>> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let service = Arc::clone(self);
                tokio::task::spawn_blocking(move || service.save(&request))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(err) => Err(SaveServiceError::BatchJoin(err.to_string())),
            });
        }
        results
    }

    /// The linear pipeline for one (sink, image) pair.
    fn run_pipeline(
        &self,
        graph: &WorkflowGraph,
        sink_id: &str,
        request: &SaveRequest,
    ) -> Result<SaveReport> {
        let trace = TraceResult::trace(sink_id, graph)?;

        let extractor =
            FieldExtractor::new(&self.registry, &self.hash_cache, &self.config.asset_roots);
        let extraction = extractor.extract(&trace, graph);

        // Inline tags from whichever prompts the extractor found
        let mut inline_assets = Vec::new();
        for field in [CaptureField::PositivePrompt, CaptureField::NegativePrompt] {
            if let Some(text) = extraction.get_str(field) {
                inline_assets.extend(parse_inline_tags(text));
            }
        }
        for asset in &mut inline_assets {
            if asset.hash.is_none() {
                asset.hash = self.resolve_inline_digest(&extractor, &asset.name);
            }
        }

        // Stamp provenance into the user tree before the merge so the built
        // tree is final; user-set values still win.
        let mut user = request.user_fields.clone();
        if user.provenance.save_id.is_none() {
            user.provenance.save_id = Some(Uuid::new_v4().to_string());
        }
        if user.provenance.saved_at.is_none() {
            user.provenance.saved_at = Some(Utc::now());
        }

        let builder = CanonicalModelBuilder::new()
            .with_policy(self.config.precedence)
            .with_generator(self.config.generator.clone());
        let meta = builder.build(&extraction, &inline_assets, &user, Some(graph.snapshot()));
        debug_assert!(meta.reparse().is_ok(), "built tree must re-validate");

        let targets = self.orchestrator.dispatch(&request.image_path, &meta);
        let report = SaveReport {
            save_id: meta.provenance.save_id.clone().unwrap_or_default(),
            image_path: request.image_path.clone(),
            sink_id: sink_id.to_string(),
            targets,
        };
        log::info!(
            "saved metadata for {} (sink '{}'): {}/{} targets ok",
            report.image_path.display(),
            report.sink_id,
            report.targets.iter().filter(|t| t.success).count(),
            report.targets.len()
        );
        Ok(report)
    }

    /// Inline tags name assets without their file extension; try the bare
    /// name first, then the conventional one.
    fn resolve_inline_digest(&self, extractor: &FieldExtractor<'_>, name: &str) -> Option<String> {
        extractor
            .resolve_asset_digest(name)
            .or_else(|| extractor.resolve_asset_digest(&format!("{}.safetensors", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn basic_workflow() -> serde_json::Value {
        json!({
            "save": {"type_tag": "SaveImage", "inputs": {"images": ["sampler", 0]}},
            "sampler": {"type_tag": "KSampler", "inputs": {
                "steps": 20, "cfg": 7.0, "sampler_name": "euler", "seed": 42,
                "positive": ["prompt", 0]
            }},
            "prompt": {"type_tag": "CLIPTextEncode", "inputs": {"text": "<lora:x:1.0>masterpiece"}}
        })
    }

    fn service_with(targets: Vec<TargetFormat>) -> SaveService {
        SaveService::new(SaveConfig::default().with_targets(targets)).unwrap()
    }

    #[test]
    fn test_no_sink_is_request_misuse() {
        let service = service_with(vec![TargetFormat::TextReport]);
        let request = SaveRequest::new("/tmp/x.png", json!({
            "1": {"type_tag": "KSampler", "inputs": {"steps": 1, "cfg": 1.0}}
        }));
        assert!(matches!(
            service.save(&request),
            Err(SaveServiceError::NoSinkFound)
        ));
    }

    #[test]
    fn test_named_missing_sink_is_an_error() {
        let service = service_with(vec![TargetFormat::TextReport]);
        let request = SaveRequest::new("/tmp/x.png", basic_workflow()).with_sink("ghost");
        assert!(matches!(
            service.save(&request),
            Err(SaveServiceError::Engine(MetadataEngineError::UnknownSink(_)))
        ));
    }

    #[test]
    fn test_database_target_requires_path() {
        let result = SaveService::new(
            SaveConfig::default().with_targets(vec![TargetFormat::DatabaseIndex]),
        );
        assert!(matches!(result, Err(SaveServiceError::Config(_))));
    }

    #[test]
    fn test_save_produces_one_report_per_sink() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("render.png");

        let service = service_with(vec![TargetFormat::TextReport]);
        let mut workflow = basic_workflow();
        workflow["save2"] = json!({"type_tag": "SaveImage", "inputs": {"images": ["sampler", 0]}});

        let reports = service
            .save(&SaveRequest::new(&image, workflow))
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].sink_id, "save");
        assert_eq!(reports[1].sink_id, "save2");
        // Each save gets its own id
        assert_ne!(reports[0].save_id, reports[1].save_id);
    }
}
