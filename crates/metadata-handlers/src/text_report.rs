//! Text Report Handler
//!
//! Writes a human-readable `.txt` summary next to the image. The report is
//! meant for people, not machines; `read` recovers the generation parameters
//! from the key/value block on a best-effort basis and nothing else.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use gravure_metadata_contracts::{CanonicalMetadata, MetadataHandler, TargetFormat};

/// Writes canonical metadata as a plain-text report.
///
/// Unconstrained target: always receives the Full stage.
#[derive(Debug, Clone, Default)]
pub struct TextReportHandler;

impl TextReportHandler {
    pub fn new() -> Self {
        Self
    }

    /// Report path: the image path with a `.txt` extension.
    fn report_path(image_path: &Path) -> PathBuf {
        image_path.with_extension("txt")
    }

    fn render(meta: &CanonicalMetadata) -> String {
        let mut out = String::new();

        if let Some(title) = &meta.basic.title {
            let _ = writeln!(out, "Title: {}", title);
        }
        if let Some(author) = &meta.basic.author {
            let _ = writeln!(out, "Author: {}", author);
        }
        if !meta.basic.tags.is_empty() {
            let _ = writeln!(out, "Tags: {}", meta.basic.tags.join(", "));
        }

        let generation = &meta.ai_info.generation;
        if let Some(prompt) = &generation.positive_prompt {
            let _ = writeln!(out, "Positive prompt: {}", prompt);
        }
        if let Some(prompt) = &generation.negative_prompt {
            let _ = writeln!(out, "Negative prompt: {}", prompt);
        }
        if let Some(steps) = generation.steps {
            let _ = writeln!(out, "Steps: {}", steps);
        }
        if let Some(sampler) = &generation.sampler_name {
            let _ = writeln!(out, "Sampler: {}", sampler);
        }
        if let Some(scheduler) = &generation.scheduler {
            let _ = writeln!(out, "Scheduler: {}", scheduler);
        }
        if let Some(cfg) = generation.cfg_scale {
            let _ = writeln!(out, "CFG scale: {}", cfg);
        }
        if let Some(seed) = generation.seed {
            let _ = writeln!(out, "Seed: {}", seed);
        }
        if let (Some(width), Some(height)) = (generation.width, generation.height) {
            let _ = writeln!(out, "Size: {}x{}", width, height);
        }

        for model in &meta.ai_info.assets.models {
            match &model.hash {
                Some(hash) => {
                    let _ = writeln!(out, "Model: {} [{}]", model.name, &hash[..10.min(hash.len())]);
                }
                None => {
                    let _ = writeln!(out, "Model: {}", model.name);
                }
            }
        }
        for lora in &meta.ai_info.assets.loras {
            let _ = writeln!(
                out,
                "LoRA: {} ({}/{}, {})",
                lora.name, lora.strength_model, lora.strength_clip, lora.source
            );
        }

        if let Some(generator) = &meta.provenance.generator {
            let _ = writeln!(out, "Generator: {}", generator);
        }
        if let Some(saved_at) = &meta.provenance.saved_at {
            let _ = writeln!(out, "Saved: {}", saved_at.to_rfc3339());
        }

        out
    }
}

impl MetadataHandler for TextReportHandler {
    fn format(&self) -> TargetFormat {
        TargetFormat::TextReport
    }

    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool {
        let report_path = Self::report_path(path);
        match std::fs::write(&report_path, Self::render(meta)) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to write text report {}: {}", report_path.display(), err);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> CanonicalMetadata {
        let mut meta = CanonicalMetadata::default();
        let Ok(content) = std::fs::read_to_string(Self::report_path(path)) else {
            return meta;
        };

        for line in content.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            let generation = &mut meta.ai_info.generation;
            match key {
                "Title" => meta.basic.title = Some(value.to_string()),
                "Author" => meta.basic.author = Some(value.to_string()),
                "Positive prompt" => generation.positive_prompt = Some(value.to_string()),
                "Negative prompt" => generation.negative_prompt = Some(value.to_string()),
                "Steps" => generation.steps = value.parse().ok(),
                "Sampler" => generation.sampler_name = Some(value.to_string()),
                "Scheduler" => generation.scheduler = Some(value.to_string()),
                "CFG scale" => generation.cfg_scale = value.parse().ok(),
                "Seed" => generation.seed = value.parse().ok(),
                _ => {}
            }
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravure_metadata_contracts::{AssetRef, ModelRef};

    fn sample() -> CanonicalMetadata {
        let mut meta = CanonicalMetadata::default();
        meta.basic.title = Some("Evening study".to_string());
        meta.ai_info.generation.positive_prompt = Some("masterpiece".to_string());
        meta.ai_info.generation.steps = Some(28);
        meta.ai_info.generation.sampler_name = Some("euler".to_string());
        meta.ai_info.generation.cfg_scale = Some(6.5);
        meta.ai_info.assets.models.push(ModelRef::new("sd15.safetensors"));
        meta.ai_info.assets.loras.push(AssetRef::loader("detail", 0.8, 0.6));
        meta
    }

    #[test]
    fn test_write_and_read_back_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("render.png");

        let handler = TextReportHandler::new();
        assert!(handler.write(&image, &sample()));

        let report = std::fs::read_to_string(dir.path().join("render.txt")).unwrap();
        assert!(report.contains("Positive prompt: masterpiece"));
        assert!(report.contains("LoRA: detail (0.8/0.6, loader)"));

        let read = handler.read(&image);
        assert_eq!(read.basic.title.as_deref(), Some("Evening study"));
        assert_eq!(read.ai_info.generation.steps, Some(28));
        assert_eq!(read.ai_info.generation.cfg_scale, Some(6.5));
    }

    #[test]
    fn test_read_missing_report_yields_empty_tree() {
        let handler = TextReportHandler::new();
        let meta = handler.read(Path::new("/nonexistent/render.png"));
        assert!(meta.is_empty());
    }

    #[test]
    fn test_write_to_missing_directory_fails_cleanly() {
        let handler = TextReportHandler::new();
        assert!(!handler.write(Path::new("/nonexistent/dir/render.png"), &sample()));
    }
}
