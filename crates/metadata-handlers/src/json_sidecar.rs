//! JSON Sidecar Handler
//!
//! Writes the canonical tree verbatim to `<image stem>.json`. This is the
//! lossless sidecar target and the one round-trip-faithful `read`.

use std::path::{Path, PathBuf};

use gravure_metadata_contracts::{CanonicalMetadata, MetadataHandler, TargetFormat};

/// Writes canonical metadata as a pretty-printed JSON sidecar.
///
/// Unconstrained target: always receives the Full stage.
#[derive(Debug, Clone, Default)]
pub struct JsonSidecarHandler;

impl JsonSidecarHandler {
    pub fn new() -> Self {
        Self
    }

    fn sidecar_path(image_path: &Path) -> PathBuf {
        image_path.with_extension("json")
    }
}

impl MetadataHandler for JsonSidecarHandler {
    fn format(&self) -> TargetFormat {
        TargetFormat::JsonSidecar
    }

    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool {
        let sidecar = Self::sidecar_path(path);
        let payload = match serde_json::to_vec_pretty(&meta.to_value()) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("failed to serialize metadata for {}: {}", sidecar.display(), err);
                return false;
            }
        };
        match std::fs::write(&sidecar, payload) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to write JSON sidecar {}: {}", sidecar.display(), err);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> CanonicalMetadata {
        let sidecar = Self::sidecar_path(path);
        let Ok(bytes) = std::fs::read(&sidecar) else {
            return CanonicalMetadata::default();
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            log::warn!("JSON sidecar {} is not valid JSON", sidecar.display());
            return CanonicalMetadata::default();
        };
        CanonicalMetadata::from_value(&value).unwrap_or_else(|err| {
            log::warn!("JSON sidecar {} failed validation: {}", sidecar.display(), err);
            CanonicalMetadata::default()
        })
    }
}
