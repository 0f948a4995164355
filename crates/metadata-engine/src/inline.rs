//! Inline asset tag scanning
//!
//! Prompts can reference LoRAs directly in text, e.g.
//! `<lora:detail_tweaker:0.8>` or `<lora:detail_tweaker:0.8:0.6>`, bypassing
//! loader nodes entirely. This scanner finds those references.
//!
//! Two patterns are tried in priority order: the strict form with one or two
//! float strengths, and a legacy colon-separated form that is only consulted
//! when the strict pattern matches nothing in the text. When a single
//! strength is given it applies to both the model and CLIP halves.
//!
//! This is a pure text → asset-reference function; reconciliation against
//! loader-discovered assets happens in the model builder.

use once_cell::sync::Lazy;
use regex::Regex;

use gravure_metadata_contracts::AssetRef;

static STRICT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<lora:([^:<>]+):(-?\d+(?:\.\d+)?)(?::(-?\d+(?:\.\d+)?))?>")
        .expect("strict inline tag pattern is valid")
});

static LEGACY_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<lora:([^:<>]+):([^<>]+)>").expect("legacy inline tag pattern is valid")
});

/// Scan `text` for inline LoRA tags.
///
/// Returned references carry `source: Inline` and no hash; order follows
/// appearance in the text.
pub fn parse_inline_tags(text: &str) -> Vec<AssetRef> {
    let strict: Vec<AssetRef> = STRICT_TAG
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let strength_model: f64 = caps.get(2)?.as_str().parse().ok()?;
            let strength_clip = match caps.get(3) {
                Some(m) => m.as_str().parse().ok()?,
                None => strength_model,
            };
            Some(AssetRef::inline(name, strength_model, strength_clip))
        })
        .collect();

    if !strict.is_empty() {
        return strict;
    }

    LEGACY_TAG
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let rest = caps.get(2)?.as_str();
            let mut parts = rest.split(':');
            let strength_model: f64 = parts.next()?.trim().parse().ok()?;
            // A second segment that does not parse falls back to the primary
            // strength rather than discarding the whole tag.
            let strength_clip = parts
                .next()
                .and_then(|part| part.trim().parse().ok())
                .unwrap_or(strength_model);
            Some(AssetRef::inline(name, strength_model, strength_clip))
        })
        .collect()
}
