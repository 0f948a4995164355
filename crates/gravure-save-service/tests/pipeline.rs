//! End-to-end pipeline tests: raw workflow document in, storage targets out.

use std::sync::Arc;

use serde_json::json;

use gravure_save_service::{
    CanonicalMetadata, FallbackStage, SaveConfig, SaveRequest, SaveService, TargetFormat,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Minimal but structurally valid JPEG: SOI, APP0 stub, SOS, data, EOI.
fn minimal_jpeg() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0xFF, 0xD8]);
    bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x07]);
    bytes.extend_from_slice(b"JFIF\0");
    bytes.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x42]);
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

fn generation_workflow(prompt: &str) -> serde_json::Value {
    json!({
        "save": {"type_tag": "SaveImage", "inputs": {"images": ["sampler", 0]}},
        "sampler": {"type_tag": "KSampler", "inputs": {
            "steps": 20, "cfg": 7.0, "sampler_name": "euler", "seed": 42,
            "model": ["ckpt", 0],
            "positive": ["pos", 0], "negative": ["neg", 0]
        }},
        "ckpt": {"type_tag": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "sd15.safetensors"}},
        "pos": {"type_tag": "CLIPTextEncode", "inputs": {"text": prompt}},
        "neg": {"type_tag": "CLIPTextEncode", "inputs": {"text": "blurry, lowres"}}
    })
}

#[test]
fn scenario_sampler_and_inline_lora_land_in_canonical_tree() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("render.png");

    let service = SaveService::new(
        SaveConfig::default().with_targets(vec![TargetFormat::JsonSidecar]),
    )
    .unwrap();

    let reports = service
        .save(&SaveRequest::new(
            &image,
            generation_workflow("<lora:x:1.0>masterpiece"),
        ))
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].all_succeeded());

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("render.json")).unwrap()).unwrap();
    let meta = CanonicalMetadata::from_value(&raw).unwrap();

    assert_eq!(meta.ai_info.generation.steps, Some(20));
    assert_eq!(meta.ai_info.generation.cfg_scale, Some(7.0));
    assert_eq!(meta.ai_info.generation.sampler_name.as_deref(), Some("euler"));
    assert_eq!(
        meta.ai_info.generation.positive_prompt.as_deref(),
        Some("<lora:x:1.0>masterpiece")
    );
    assert_eq!(
        meta.ai_info.generation.negative_prompt.as_deref(),
        Some("blurry, lowres")
    );

    let loras = &meta.ai_info.assets.loras;
    assert_eq!(loras.len(), 1);
    assert_eq!(loras[0].name, "x");
    assert_eq!(loras[0].strength_model, 1.0);
    assert_eq!(loras[0].strength_clip, 1.0);

    assert_eq!(meta.ai_info.assets.models[0].name, "sd15.safetensors");
    // Full stage on an unconstrained target keeps the workflow snapshot
    assert!(meta.ai_info.workflow.is_some());
    assert_eq!(meta.provenance.fallback_stage, Some(FallbackStage::Full));
    assert!(meta.provenance.save_id.is_some());
}

#[test]
fn asset_roots_resolve_model_and_lora_digests() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("sd15.safetensors"), b"checkpoint bytes").unwrap();
    std::fs::write(models.join("x.safetensors"), b"lora bytes").unwrap();

    let image = dir.path().join("render.png");
    let service = SaveService::new(
        SaveConfig::default()
            .with_targets(vec![TargetFormat::JsonSidecar])
            .with_asset_root(&models),
    )
    .unwrap();

    service
        .save(&SaveRequest::new(
            &image,
            generation_workflow("<lora:x:0.8>portrait"),
        ))
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("render.json")).unwrap()).unwrap();
    let meta = CanonicalMetadata::from_value(&raw).unwrap();

    let model_hash = meta.ai_info.assets.models[0].hash.as_deref().unwrap();
    assert_eq!(model_hash.len(), 64);
    let lora_hash = meta.ai_info.assets.loras[0].hash.as_deref().unwrap();
    assert_eq!(lora_hash.len(), 64);

    // Hash sidecars were left next to the assets for the next save
    assert!(models.join("sd15.safetensors.sha256").exists());
    assert!(models.join("x.safetensors.sha256").exists());
}

#[test]
fn embedded_target_degrades_while_sidecar_stays_full() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("render.jpg");
    std::fs::write(&image, minimal_jpeg()).unwrap();

    // A workflow snapshot far past the JPEG segment limit
    let mut workflow = generation_workflow("masterpiece");
    workflow["noise"] = json!({
        "type_tag": "Unknown",
        "inputs": {"blob": "n".repeat(120_000)}
    });

    let service = SaveService::new(SaveConfig::default().with_targets(vec![
        TargetFormat::EmbeddedImage,
        TargetFormat::JsonSidecar,
    ]))
    .unwrap();

    let reports = service.save(&SaveRequest::new(&image, workflow)).unwrap();
    let report = &reports[0];
    assert!(report.all_succeeded());

    let embedded = report.target(TargetFormat::EmbeddedImage).unwrap();
    assert!(embedded.stage.unwrap() >= FallbackStage::Reduced);
    assert!(embedded.payload_bytes.unwrap() <= 60_000);

    let sidecar = report.target(TargetFormat::JsonSidecar).unwrap();
    assert_eq!(sidecar.stage, Some(FallbackStage::Full));
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_saves_share_the_database_independently() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("index.db");

    let service = Arc::new(
        SaveService::new(
            SaveConfig::default()
                .with_targets(vec![TargetFormat::JsonSidecar])
                .with_database(&db_path),
        )
        .unwrap(),
    );

    let requests: Vec<SaveRequest> = (0..4)
        .map(|i| {
            SaveRequest::new(
                dir.path().join(format!("render-{}.png", i)),
                generation_workflow(&format!("image number {}", i)),
            )
        })
        .collect();

    let results = service.save_batch(requests).await;
    assert_eq!(results.len(), 4);
    for result in &results {
        let reports = result.as_ref().unwrap();
        assert!(reports[0].all_succeeded());
    }

    // Every image got its own row and sidecar
    for i in 0..4 {
        assert!(dir.path().join(format!("render-{}.json", i)).exists());
    }
}

#[test]
fn one_fatal_target_never_blocks_the_others() {
    let dir = tempfile::tempdir().unwrap();
    // No JPEG at this path: the embedded target must fail
    let image = dir.path().join("render.jpg");
    std::fs::write(&image, b"not a jpeg").unwrap();

    let service = SaveService::new(SaveConfig::default().with_targets(vec![
        TargetFormat::EmbeddedImage,
        TargetFormat::TextReport,
        TargetFormat::JsonSidecar,
    ]))
    .unwrap();

    let reports = service
        .save(&SaveRequest::new(&image, generation_workflow("masterpiece")))
        .unwrap();
    let report = &reports[0];

    assert!(!report.target(TargetFormat::EmbeddedImage).unwrap().success);
    assert!(report.target(TargetFormat::TextReport).unwrap().success);
    assert!(report.target(TargetFormat::JsonSidecar).unwrap().success);
    assert!(dir.path().join("render.txt").exists());
}

#[test]
fn user_fields_override_workflow_values_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("render.png");

    let mut user = CanonicalMetadata::default();
    user.basic.title = Some("Commissioned piece".to_string());
    user.ai_info.generation.steps = Some(99);

    let service = SaveService::new(
        SaveConfig::default().with_targets(vec![TargetFormat::JsonSidecar]),
    )
    .unwrap();
    service
        .save(
            &SaveRequest::new(&image, generation_workflow("masterpiece"))
                .with_user_fields(user),
        )
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("render.json")).unwrap()).unwrap();
    let meta = CanonicalMetadata::from_value(&raw).unwrap();
    assert_eq!(meta.basic.title.as_deref(), Some("Commissioned piece"));
    assert_eq!(meta.ai_info.generation.steps, Some(99));
    // Unset fields still come from the workflow
    assert_eq!(meta.ai_info.generation.sampler_name.as_deref(), Some("euler"));
}
