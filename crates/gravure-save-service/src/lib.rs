//! Gravure Save Service
//!
//! Host-agnostic application services over the metadata engine: a
//! configuration layer, the single-save pipeline, and a concurrent batch
//! runner. The host editor's plugin glue calls into this crate; nothing in
//! here knows how the host registers nodes or renders images.
//!
//! A save operation never raises an error that would prevent the image
//! itself from being written: per-target failures and fallback stages are
//! reported in the [`SaveReport`], and `Err` is reserved for request-level
//! misuse (an unparseable document or a sink that does not exist).

pub mod config;
pub mod service;

pub use config::{SaveConfig, DEFAULT_GENERATOR};
pub use service::{Result, SaveReport, SaveRequest, SaveService, SaveServiceError};

// Re-export the pieces hosts need alongside the service
pub use gravure_metadata_contracts::{CanonicalMetadata, FallbackStage, TargetFormat};
pub use metadata_engine::{PrecedencePolicy, RuleRegistry, TargetOutcome};
