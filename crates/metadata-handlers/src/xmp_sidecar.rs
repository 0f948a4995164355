//! XMP Sidecar Handler
//!
//! Writes an XMP packet to `<image stem>.xmp`. Standard viewers get the
//! Dublin Core basics (title, description, subject tags); the full canonical
//! tree rides along as JSON inside a `gravure:CanonicalMetadata` property so
//! `read` can recover everything without an XML parser — the packet is
//! generated, never hand-edited, and the payload sits between fixed markers.

use std::path::{Path, PathBuf};

use gravure_metadata_contracts::{CanonicalMetadata, MetadataHandler, TargetFormat};

const PAYLOAD_OPEN: &str = "<gravure:CanonicalMetadata><![CDATA[";
const PAYLOAD_CLOSE: &str = "]]></gravure:CanonicalMetadata>";

/// Writes canonical metadata as an XMP sidecar packet.
///
/// Unconstrained target: always receives the Full stage.
#[derive(Debug, Clone, Default)]
pub struct XmpSidecarHandler;

impl XmpSidecarHandler {
    pub fn new() -> Self {
        Self
    }

    fn sidecar_path(image_path: &Path) -> PathBuf {
        image_path.with_extension("xmp")
    }

    fn render(meta: &CanonicalMetadata) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(&meta.to_value())?;

        let mut dc = String::new();
        if let Some(title) = &meta.basic.title {
            dc.push_str(&format!(
                "      <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>\n",
                escape_xml(title)
            ));
        }
        if let Some(description) = &meta.basic.description {
            dc.push_str(&format!(
                "      <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:description>\n",
                escape_xml(description)
            ));
        }
        if !meta.basic.tags.is_empty() {
            dc.push_str("      <dc:subject><rdf:Bag>\n");
            for tag in &meta.basic.tags {
                dc.push_str(&format!("        <rdf:li>{}</rdf:li>\n", escape_xml(tag)));
            }
            dc.push_str("      </rdf:Bag></dc:subject>\n");
        }

        Ok(format!(
            "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n\
             <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n\
             \x20 <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n\
             \x20   <rdf:Description rdf:about=\"\"\n\
             \x20       xmlns:dc=\"http://purl.org/dc/elements/1.1/\"\n\
             \x20       xmlns:gravure=\"https://gravure.dev/xmp/1.0/\">\n\
             {}      {}{}{}\n\
             \x20   </rdf:Description>\n\
             \x20 </rdf:RDF>\n\
             </x:xmpmeta>\n\
             <?xpacket end=\"w\"?>\n",
            dc, PAYLOAD_OPEN, payload, PAYLOAD_CLOSE
        ))
    }
}

impl MetadataHandler for XmpSidecarHandler {
    fn format(&self) -> TargetFormat {
        TargetFormat::XmpSidecar
    }

    fn write(&self, path: &Path, meta: &CanonicalMetadata) -> bool {
        let sidecar = Self::sidecar_path(path);
        let packet = match Self::render(meta) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("failed to serialize XMP payload for {}: {}", sidecar.display(), err);
                return false;
            }
        };
        match std::fs::write(&sidecar, packet) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to write XMP sidecar {}: {}", sidecar.display(), err);
                false
            }
        }
    }

    fn read(&self, path: &Path) -> CanonicalMetadata {
        let sidecar = Self::sidecar_path(path);
        let Ok(packet) = std::fs::read_to_string(&sidecar) else {
            return CanonicalMetadata::default();
        };

        let payload = packet
            .split_once(PAYLOAD_OPEN)
            .and_then(|(_, rest)| rest.split_once(PAYLOAD_CLOSE))
            .map(|(payload, _)| payload);
        let Some(payload) = payload else {
            log::warn!("XMP sidecar {} has no canonical payload", sidecar.display());
            return CanonicalMetadata::default();
        };

        serde_json::from_str::<serde_json::Value>(payload)
            .ok()
            .and_then(|value| CanonicalMetadata::from_value(&value).ok())
            .unwrap_or_else(|| {
                log::warn!("XMP sidecar {} payload failed validation", sidecar.display());
                CanonicalMetadata::default()
            })
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
