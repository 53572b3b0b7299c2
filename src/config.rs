//! Configuration loading for the publisher CLI.

pub mod duration;

use anyhow::Context;
use reliable_producer::ProducerConfig;
use std::path::Path;

/// Load a `ProducerConfig` from a TOML file.
///
/// Keys missing from the file keep the producer defaults. The result is not
/// validated here; `Producer::new` does that once all overrides are applied.
pub fn load_config_file(path: &Path) -> anyhow::Result<ProducerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
