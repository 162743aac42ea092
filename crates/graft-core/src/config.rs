//! Bootstrap configuration (graft.toml)
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! wrapper = "LoaderWrapper.gbc"
//! modules-dir = "Loader"
//! reserved-module = "Host"
//! resolver-exclusions = ["SoundFlow", "SharpFont"]
//! miss-policy = "reject"
//! resolver-scope = "global"
//!
//! [targets]
//! entry-method = "Main"
//! load-strategy-type = "Loader.FileLoadStrategy"
//! ```

use crate::redirect::MissPolicy;
use crate::resolver::ResolverScope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Bootstrap settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Wrapper module, loaded before anything else
    pub wrapper: PathBuf,

    /// Directory scanned for modules to preload
    pub modules_dir: PathBuf,

    /// File extension of module files (without the dot)
    pub extension: String,

    /// Module the file loader must never load
    pub reserved_module: String,

    /// Modules that keep their own native resolution
    pub resolver_exclusions: Vec<String>,

    /// File loader behavior for unknown modules
    pub miss_policy: MissPolicy,

    /// Which modules receive the forwarded resolver
    pub resolver_scope: ResolverScope,

    /// Names of the methods and types to patch
    pub targets: TargetNames,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            wrapper: PathBuf::from("LoaderWrapper.gbc"),
            modules_dir: PathBuf::from("Loader"),
            extension: "gbc".to_string(),
            reserved_module: "Host".to_string(),
            resolver_exclusions: vec!["SoundFlow".to_string(), "SharpFont".to_string()],
            miss_policy: MissPolicy::default(),
            resolver_scope: ResolverScope::default(),
            targets: TargetNames::default(),
        }
    }
}

/// Names the bootstrap looks up in the loaded subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetNames {
    /// Startup method on the entry point's declaring type
    pub entry_method: String,

    /// Return type the startup method must have
    pub entry_returns: String,

    /// Type holding the file loader method
    pub load_strategy_type: String,

    /// File loader method
    pub load_file_method: String,

    /// Native resolver method on the entry point's declaring type
    pub resolver_method: String,
}

impl Default for TargetNames {
    fn default() -> Self {
        Self {
            entry_method: "Main".to_string(),
            entry_returns: "task".to_string(),
            load_strategy_type: "Loader.FileLoadStrategy".to_string(),
            load_file_method: "load_file".to_string(),
            resolver_method: "resolve_native_library".to_string(),
        }
    }
}

impl BootstrapConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: BootstrapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wrapper.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Wrapper path cannot be empty".to_string(),
            ));
        }

        if self.extension.is_empty() || self.extension.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid extension: '{}'. Use the bare extension, e.g. \"gbc\"",
                self.extension
            )));
        }

        if self.reserved_module.is_empty() {
            return Err(ConfigError::ValidationError(
                "Reserved module name cannot be empty".to_string(),
            ));
        }

        let targets = [
            ("entry-method", &self.targets.entry_method),
            ("entry-returns", &self.targets.entry_returns),
            ("load-strategy-type", &self.targets.load_strategy_type),
            ("load-file-method", &self.targets.load_file_method),
            ("resolver-method", &self.targets.resolver_method),
        ];
        for (field, value) in targets {
            if value.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "targets.{} cannot be empty",
                    field
                )));
            }
        }

        Ok(())
    }

    /// Resolve relative paths against `root`
    pub fn rooted_at(mut self, root: &Path) -> Self {
        if self.wrapper.is_relative() {
            self.wrapper = root.join(&self.wrapper);
        }
        if self.modules_dir.is_relative() {
            self.modules_dir = root.join(&self.modules_dir);
        }
        self
    }
}
