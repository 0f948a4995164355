//! Gravure Metadata Contracts
//!
//! Canonical cross-crate semantics for the Gravure metadata engine:
//!
//! - The [`CanonicalMetadata`] tree — the single source of truth produced by
//!   the engine before any format-specific serialization
//! - Asset reference types ([`AssetRef`], [`AssetSource`]) shared between the
//!   extractor, the inline tag parser, and the canonical tree
//! - The staged-fallback taxonomy ([`FallbackStage`]) for size-constrained
//!   containers
//! - The [`MetadataHandler`] boundary trait implemented by format handlers
//!
//! This crate performs no I/O beyond serde; every consumer (engine, handlers,
//! save service) depends on it and nothing here depends back on them.

pub mod assets;
pub mod canonical;
pub mod handler;
pub mod stage;

pub use assets::{AssetRef, AssetSource, ModelRef};
pub use canonical::{
    AiInfo, AssetInfo, AuditEntry, BasicInfo, CanonicalMetadata, Classification,
    GenerationParams, Provenance, SchemaError, TechnicalInfo,
};
pub use handler::{MetadataHandler, TargetFormat};
pub use stage::FallbackStage;
