//! Layered runtime settings: built-in defaults, the selected ranking preset,
//! an optional `thread-finder.toml`, then `THREAD_FINDER__*` variables.

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tf_core::{RankingConfig, RankingPreset};

const CONFIG_FILE: &str = "thread-finder";
const ENV_PREFIX: &str = "THREAD_FINDER";
const DEFAULT_DATABASE_URL: &str = "sqlite:thread_finder.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<RankingPreset>,
    #[serde(default)]
    pub ranking: RankingConfig,
}

#[derive(Deserialize)]
struct PresetOnly {
    #[serde(default)]
    preset: Option<RankingPreset>,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_sources(|builder| {
            builder
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .separator("__")
                        .try_parsing(true),
                )
        })
    }

    /// Resolves the preset first, then layers `sources` over the preset's
    /// ranking values so individual keys still override it.
    pub fn from_sources<F>(sources: F) -> anyhow::Result<Self>
    where
        F: Fn(ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState>,
    {
        let PresetOnly { preset } = sources(Config::builder()).build()?.try_deserialize()?;

        let defaults = Settings {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            preset,
            ranking: preset.map(RankingPreset::config).unwrap_or_default(),
        };
        let settings: Settings = sources(Config::builder().add_source(Config::try_from(&defaults)?))
            .build()?
            .try_deserialize()?;

        settings.ranking.validate()?;
        Ok(settings)
    }
}
