//! Layered configuration for the engine's two knobs: the data directory and
//! the active-segment rotation threshold. Resolved lowest to highest
//! precedence as defaults, an optional config file, then environment
//! variables prefixed `CASKDB_`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

const DEFAULT_DIR: &str = "cask-data";
const DEFAULT_MAX_SEGMENT_SIZE: u64 = 16 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dir: PathBuf,
    pub max_segment_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from(DEFAULT_DIR), max_segment_size: DEFAULT_MAX_SEGMENT_SIZE }
    }
}

impl EngineConfig {
    /// Resolves configuration from defaults, an optional config file at
    /// `path` (if it exists), and `CASKDB_*` environment variables, in that
    /// order of increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("dir", defaults.dir.to_string_lossy().into_owned())?
            .set_default("max_segment_size", defaults.max_segment_size)?;

        if let Some(path) = path {
            if path.exists() {
                builder = builder.add_source(
                    config::File::from(path).format(config::FileFormat::Toml),
                );
            }
        }

        builder = builder.add_source(config::Environment::with_prefix("CASKDB"));

        let resolved = builder.build()?;
        Ok(resolved.try_deserialize()?)
    }
}
