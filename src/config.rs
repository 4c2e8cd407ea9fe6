use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// User-level settings read from `REPOLINK_*` environment variables.
pub struct RepolinkConfig {
    pub cache_dir: Option<PathBuf>,
    pub link_subdir: Option<String>,
}

impl RepolinkConfig {
    pub fn load() -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(None)?;

        Ok(Self {
            cache_dir: raw_config.cache.dir,
            link_subdir: raw_config.link.subdir.filter(|s| !s.is_empty()),
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    link: LinkConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct LinkConfig {
    subdir: Option<String>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("REPOLINK")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
