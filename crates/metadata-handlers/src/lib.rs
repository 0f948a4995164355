//! Metadata Handlers
//!
//! Format handler implementations for the Gravure metadata engine. Each
//! handler owns one storage target and its entire binary layout; the engine
//! only sees the [`MetadataHandler`] contract.
//!
//! # Targets
//!
//! - **TextReport**: human-readable `.txt` summary
//! - **XmpSidecar**: XMP packet with Dublin Core basics plus the full tree
//! - **JsonSidecar**: lossless canonical tree as `.json`
//! - **DatabaseIndex**: SQLite row per image for gallery queries
//! - **EmbeddedImage**: JPEG COM segment, the size-constrained container
//!
//! [`MetadataHandler`]: gravure_metadata_contracts::MetadataHandler

pub mod error;
pub mod jpeg_comment;
pub mod json_sidecar;
pub mod sqlite_index;
pub mod text_report;
pub mod xmp_sidecar;

pub use error::{HandlerError, Result};
pub use jpeg_comment::JpegCommentHandler;
pub use json_sidecar::JsonSidecarHandler;
pub use sqlite_index::SqliteIndexHandler;
pub use text_report::TextReportHandler;
pub use xmp_sidecar::XmpSidecarHandler;
