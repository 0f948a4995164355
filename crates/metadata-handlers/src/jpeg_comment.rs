//! JPEG Comment Handler
//!
//! Embeds canonical metadata as a COM segment spliced in right after the
//! SOI marker. A JPEG segment length field is 16-bit, so one segment holds
//! at most 65,533 bytes of data — this is the hard-limited container the
//! staged fallback ladder exists for. The declared limit sits below the
//! structural cap to leave room for the payload prefix and marker overhead.
//!
//! The payload is the staged tree's canonical JSON behind a fixed prefix, so
//! `read` can tell our comment apart from other software's.

use std::path::Path;

use gravure_metadata_contracts::{CanonicalMetadata, MetadataHandler, TargetFormat};

use crate::error::{HandlerError, Result};

/// JPEG Start Of Image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];
/// COM segment marker byte.
const MARKER_COM: u8 = 0xFE;
/// Start Of Scan marker byte; entropy-coded data follows, stop scanning.
const MARKER_SOS: u8 = 0xDA;
/// End Of Image marker byte.
const MARKER_EOI: u8 = 0xD9;

/// Identifies our COM segments among arbitrary comments.
const PAYLOAD_PREFIX: &[u8] = b"GRAVURE1";

/// Maximum data bytes in one segment: 16-bit length minus the length field.
pub const MAX_SEGMENT_DATA: usize = 65_533;

/// Declared payload limit handed to the orchestrator.
pub const DECLARED_LIMIT: usize = 60_000;

/// Embeds canonical metadata in a JPEG COM segment.
///
/// Size-constrained target: receives whatever fallback stage fits.
#[derive(Debug, Clone, Default)]
pub struct JpegCommentHandler;

impl JpegCommentHandler {
    pub fn new() -> Self {
        Self
    }

    fn embed(&self, path: &Path, meta: &CanonicalMetadata) -> Result<()> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 2 || bytes[..2] != SOI {
            return Err(HandlerError::UnsupportedContainer(format!(
                "{} is not a JPEG",
                path.display()
            )));
        }

        let payload = serde_json::to_vec(&meta.to_value())?;
        let data_len = PAYLOAD_PREFIX.len() + payload.len();
        if data_len > MAX_SEGMENT_DATA {
            return Err(HandlerError::PayloadTooLarge {
                size: data_len,
                limit: MAX_SEGMENT_DATA,
            });
        }

        // Drop any comment segment we wrote previously.
        let stripped = strip_gravure_comments(&bytes);

        let mut out = Vec::with_capacity(stripped.len() + data_len + 4);
        out.extend_from_slice(&SOI);
        out.push(0xFF);
        out.push(MARKER_COM);
        let seg_len = (data_len + 2) as u16;
        out.extend_from_slice(&seg_len.to_be_bytes());
        out.extend_from_slice(PAYLOAD_PREFIX);
        out.extend_from_slice(&payload);
        out.extend_from_slice(&stripped[2..]);

        // Write-then-rename so a failed write never truncates the image.
        let tmp = path.with_extension("jpg.tmp");
        std::fs::write(&tmp, &out)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl MetadataHandler for JpegCommentHandler {
    fn format(&self) -> TargetFormat {
        TargetFormat::EmbeddedImage
    }

    fn size_limit(&self) -> Option<usize> {
        Some(DECLARED_LIMIT)
    }

    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool {
        match self.embed(path, meta) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to embed metadata in {}: {}", path.display(), err);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> CanonicalMetadata {
        let Ok(bytes) = std::fs::read(path) else {
            return CanonicalMetadata::default();
        };
        let Some(payload) = find_gravure_payload(&bytes) else {
            return CanonicalMetadata::default();
        };
        serde_json::from_slice::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| CanonicalMetadata::from_value(&value).ok())
            .unwrap_or_else(|| {
                log::warn!("embedded metadata in {} failed validation", path.display());
                CanonicalMetadata::default()
            })
    }
}

/// Byte ranges of segments in the header, `(start, end, marker)`.
///
/// Scanning stops at SOS/EOI; our segment always sits before either.
fn header_segments(bytes: &[u8]) -> Vec<(usize, usize, u8)> {
    let mut segments = Vec::new();
    if bytes.len() < 2 || bytes[..2] != SOI {
        return segments;
    }

    let mut i = 2;
    while i + 1 < bytes.len() {
        if bytes[i] != 0xFF {
            break;
        }
        let marker = bytes[i + 1];
        if marker == MARKER_SOS || marker == MARKER_EOI {
            break;
        }
        // Standalone markers carry no length field
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            i += 2;
            continue;
        }
        if i + 3 >= bytes.len() {
            break;
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let end = i + 2 + len;
        if len < 2 || end > bytes.len() {
            break;
        }
        segments.push((i, end, marker));
        i = end;
    }
    segments
}

/// The JSON payload of our comment segment, if one exists.
fn find_gravure_payload(bytes: &[u8]) -> Option<&[u8]> {
    for (start, end, marker) in header_segments(bytes) {
        if marker != MARKER_COM {
            continue;
        }
        let data = &bytes[start + 4..end];
        if data.starts_with(PAYLOAD_PREFIX) {
            return Some(&data[PAYLOAD_PREFIX.len()..]);
        }
    }
    None
}

/// The file with every gravure comment segment removed.
fn strip_gravure_comments(bytes: &[u8]) -> Vec<u8> {
    let gravure_ranges: Vec<(usize, usize)> = header_segments(bytes)
        .into_iter()
        .filter(|(start, end, marker)| {
            *marker == MARKER_COM && bytes[start + 4..*end].starts_with(PAYLOAD_PREFIX)
        })
        .map(|(start, end, _)| (start, end))
        .collect();

    if gravure_ranges.is_empty() {
        return bytes.to_vec();
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut cursor = 0;
    for (start, end) in gravure_ranges {
        out.extend_from_slice(&bytes[cursor..start]);
        cursor = end;
    }
    out.extend_from_slice(&bytes[cursor..]);
    out
}
