//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars (`__` separates nesting, e.g.
//! `APP_MODELS__MAX_LOADED=3`). Provides a helper to expand `~` and `${VAR}`
//! in configured paths.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::registry::Registry;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self::from_figment(figment))
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("failed to get '{key}': {e}")))
    }

    /// Extract and validate the typed settings tree.
    pub fn settings(&self, registry: &Registry) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate(registry)?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub models: ModelsConfig,
    pub vector: VectorConfig,
    pub data: DataConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Auto,
    Cpu,
    Metal,
    Cuda,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub cache_dir: String,
    pub max_loaded: usize,
    pub default_model: String,
    pub device: DeviceKind,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_dir: "data/models".to_string(),
            max_loaded: 2,
            default_model: "openai/ViT-B-32".to_string(),
            device: DeviceKind::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Lance,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    pub uri: String,
    pub namespace_prefix: String,
    pub scroll_limit: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Lance,
            uri: "data/lancedb".to_string(),
            namespace_prefix: "images".to_string(),
            scroll_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub images_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { images_dir: "data/images".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_limit: 10, max_limit: 50 }
    }
}

impl SearchConfig {
    /// Clamp a requested limit into `1..=max_limit`, defaulting when absent.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).clamp(1, self.max_limit.max(1))
    }
}

impl Settings {
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        if self.models.max_loaded == 0 {
            return Err(Error::InvalidConfig("models.max_loaded must be at least 1".into()));
        }
        if registry.lookup(&self.models.default_model).is_err() {
            return Err(Error::InvalidConfig(format!(
                "models.default_model '{}' is not a registered model",
                self.models.default_model
            )));
        }
        if self.vector.namespace_prefix.is_empty() {
            return Err(Error::InvalidConfig("vector.namespace_prefix must not be empty".into()));
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            return Err(Error::InvalidConfig(format!(
                "search.default_limit must be within 1..={}",
                self.search.max_limit
            )));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.models.cache_dir)
    }

    pub fn images_dir(&self) -> PathBuf {
        expand_path(&self.data.images_dir)
    }

    pub fn vector_uri(&self) -> PathBuf {
        expand_path(&self.vector.uri)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
