//! Format-handler boundary
//!
//! A handler owns one storage target (an embedded container, a sidecar file,
//! a database) and everything about its binary layout. The engine knows only
//! this trait: handlers receive an already-staged canonical tree, report
//! success as a flag, and never panic or propagate errors across the
//! boundary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalMetadata;

/// Storage targets a canonical tree can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    /// Metadata embedded inside the image file itself
    EmbeddedImage,
    /// XMP packet in a `.xmp` sidecar file
    XmpSidecar,
    /// Full canonical tree in a `.json` sidecar file
    JsonSidecar,
    /// Human-readable `.txt` report
    TextReport,
    /// Row in the relational metadata index
    DatabaseIndex,
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmbeddedImage => write!(f, "embedded_image"),
            Self::XmpSidecar => write!(f, "xmp_sidecar"),
            Self::JsonSidecar => write!(f, "json_sidecar"),
            Self::TextReport => write!(f, "text_report"),
            Self::DatabaseIndex => write!(f, "database_index"),
        }
    }
}

/// One storage target for canonical metadata.
///
/// # Contract
///
/// - `write` receives the tree already filtered for the target's stage; the
///   orchestrator has verified the serialized payload fits [`size_limit`].
///   It returns `false` on failure and must not panic across the boundary.
/// - `read` is best-effort: any failure yields an empty tree.
/// - Handlers for size-constrained formats must honor
///   `provenance.fallback_stage` in the trees they write.
///
/// [`size_limit`]: MetadataHandler::size_limit
pub trait MetadataHandler: Send + Sync {
    /// Which target this handler owns.
    fn format(&self) -> TargetFormat;

    /// Hard payload limit in bytes, or `None` for unconstrained targets.
    ///
    /// Targets returning `None` always receive the Full stage; the staged
    /// fallback state machine is a no-op for them.
    fn size_limit(&self) -> Option<usize> {
        None
    }

    /// Write the staged tree for the image at `path`.
    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool;

    /// Read previously written metadata for the image at `path`.
    fn read(&self, path: &Path) -> CanonicalMetadata;
}
