//! Configuration types for the save service

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use gravure_metadata_contracts::TargetFormat;
use metadata_engine::PrecedencePolicy;

/// Name recorded as `provenance.generator` when the user supplies none.
pub const DEFAULT_GENERATOR: &str = "Gravure";

/// Save-pipeline configuration.
///
/// One config drives every save the service performs; per-image variation
/// (user fields, sink selection) travels with the request instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Storage targets to write, in write order
    pub targets: Vec<TargetFormat>,
    /// Directories searched when resolving asset names to files for hashing
    pub asset_roots: Vec<PathBuf>,
    /// SQLite index location; required when `targets` includes the database
    pub database_path: Option<PathBuf>,
    /// Loader-vs-inline strength precedence for name collisions
    pub precedence: PrecedencePolicy,
    /// Recorded as `provenance.generator`
    pub generator: String,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                TargetFormat::EmbeddedImage,
                TargetFormat::XmpSidecar,
                TargetFormat::TextReport,
                TargetFormat::JsonSidecar,
            ],
            asset_roots: Vec::new(),
            database_path: None,
            precedence: PrecedencePolicy::default(),
            generator: DEFAULT_GENERATOR.to_string(),
        }
    }
}

impl SaveConfig {
    /// Replace the target list.
    pub fn with_targets(mut self, targets: Vec<TargetFormat>) -> Self {
        self.targets = targets;
        self
    }

    /// Add an asset root directory.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_roots.push(root.into());
        self
    }

    /// Enable the database target at the given path.
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        if !self.targets.contains(&TargetFormat::DatabaseIndex) {
            self.targets.push(TargetFormat::DatabaseIndex);
        }
        self.database_path = Some(path.into());
        self
    }

    /// Override the loader-vs-inline precedence policy.
    pub fn with_precedence(mut self, precedence: PrecedencePolicy) -> Self {
        self.precedence = precedence;
        self
    }
}
