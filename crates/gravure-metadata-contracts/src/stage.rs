//! Staged-fallback taxonomy for size-constrained containers
//!
//! Formats with hard structural limits (notably JPEG segments) cannot always
//! hold the full canonical tree. The writer orchestrator degrades the payload
//! through these stages in order and records the stage that succeeded so the
//! degradation is auditable rather than silent.

use serde::{Deserialize, Serialize};

/// Progressive payload reduction stages, tried in declaration order.
///
/// The derived `Ord` follows declaration order, so `stage >= Reduced` means
/// "some degradation happened".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStage {
    /// The entire canonical tree, including the workflow graph snapshot
    #[default]
    Full,
    /// Workflow graph snapshot dropped; all generation parameters and assets kept
    Reduced,
    /// Allow-listed reproduction essentials only (prompts, model, sampler
    /// settings, seed, dimensions, and the complete LoRA list)
    Minimal,
    /// Minimal set plus a pointer to a sidecar file holding the full tree
    SidecarPointer,
}

impl FallbackStage {
    /// The next (more aggressive) stage, or `None` after the last.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Full => Some(Self::Reduced),
            Self::Reduced => Some(Self::Minimal),
            Self::Minimal => Some(Self::SidecarPointer),
            Self::SidecarPointer => None,
        }
    }

    /// All stages, in escalation order.
    pub fn ladder() -> [Self; 4] {
        [
            Self::Full,
            Self::Reduced,
            Self::Minimal,
            Self::SidecarPointer,
        ]
    }
}

impl std::fmt::Display for FallbackStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Reduced => write!(f, "reduced"),
            Self::Minimal => write!(f, "minimal"),
            Self::SidecarPointer => write!(f, "sidecar_pointer"),
        }
    }
}
