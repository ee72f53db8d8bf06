//! Loader entry points.

use super::merge::builder_with_defaults;
use super::sources::workspace_file;
use super::QuireConfig;
use config::{ConfigError, Environment, File};
use std::path::Path;

/// Environment variables: `QUIRE__POLLING__RETRY_BUDGET=5`
const ENV_PREFIX: &str = "QUIRE";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for `dir`: defaults, workspace files, then environment.
    pub fn load(dir: &Path) -> Result<QuireConfig, ConfigError> {
        let builder = builder_with_defaults()?;
        let builder = workspace_file::add_to_builder(builder, dir)?;
        builder
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from an explicit file, then environment.
    pub fn load_from_file(path: &Path) -> Result<QuireConfig, ConfigError> {
        builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    /// Built-in defaults only.
    pub fn defaults() -> QuireConfig {
        QuireConfig::default()
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }
}
