//! Engine-wide configuration, loaded from a `ron` document the way Fyrox-family tools load their
//! settings. Covers the handful of knobs `spec.md` calls out as process-wide rather than
//! per-layer: numeric precision, the download worker pool size, the fence-wait budget, and an
//! optional override of the backend's reported maximum texture dimension (useful for testing the
//! tiling helper's behavior on hardware that doesn't actually enforce the smaller limit).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which pixel format the engine allocates intermediate tensor textures in. `spec.md` §4.2 and
/// §4.3's `HIGH_PRECISION` compile-time flag, re-expressed as a runtime choice.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum PrecisionMode {
    /// `Rgba16F`/`R16F` textures. The default; sufficient for inference and half the bandwidth of
    /// [`PrecisionMode::HighPrecision`].
    #[default]
    Standard,
    /// `Rgba32F` textures, for models or layers sensitive to FP16 rounding.
    HighPrecision,
}

impl PrecisionMode {
    /// Maps a 4-channel intermediate texture's pixel format for this precision mode.
    pub fn rgba_format(self) -> fyuse_gfx::texture::PixelFormat {
        match self {
            PrecisionMode::Standard => fyuse_gfx::texture::PixelFormat::Rgba16F,
            PrecisionMode::HighPrecision => fyuse_gfx::texture::PixelFormat::Rgba32F,
        }
    }
}

/// Process-wide engine configuration. Grounded on `spec.md` §5's "Configuration" list; every
/// field has a default so a caller can deserialize a partial document (`#[serde(default)]`) and
/// only override the knobs it cares about.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Numeric precision intermediate tensor textures are allocated in.
    pub precision: PrecisionMode,
    /// Number of worker threads backing the async GPU→CPU download pool.
    pub download_worker_threads: usize,
    /// Fence-wait budget, in seconds, for a single async download. `spec.md` §5's default is 5.
    pub fence_timeout_secs: u64,
    /// Overrides the backend-reported maximum texture dimension the tiling helper respects. `None`
    /// defers to [`fyuse_gfx::server::GfxCapabilities::max_texture_size`].
    pub max_texture_override: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: PrecisionMode::Standard,
            download_worker_threads: 2,
            fence_timeout_secs: 5,
            max_texture_override: None,
        }
    }
}

impl EngineConfig {
    /// The configured fence-wait budget as a [`Duration`].
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_secs(self.fence_timeout_secs)
    }

    /// Parses a configuration document in `ron` syntax, falling back to defaults for any field
    /// the document omits.
    pub fn from_ron(source: &str) -> Result<Self, fyuse_core::CoreError> {
        ron::de::from_str(source)
            .map_err(|e| fyuse_core::CoreError::Configuration(format!("malformed engine config: {e}")))
    }

    /// Loads a configuration document from `path`.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, fyuse_core::CoreError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| fyuse_core::CoreError::Resource(format!("cannot read {path:?}: {e}")))?;
        Self::from_ron(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_budgets() {
        let config = EngineConfig::default();
        assert_eq!(config.precision, PrecisionMode::Standard);
        assert_eq!(config.fence_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config = EngineConfig::from_ron("(precision: HighPrecision)").unwrap();
        assert_eq!(config.precision, PrecisionMode::HighPrecision);
        assert_eq!(config.download_worker_threads, 2);
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(EngineConfig::from_ron("not ron at all {{{").is_err());
    }
}
