//! Application configuration, loaded from JSON or YAML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::converter::{ConversionRuleSet, Encoding};
use crate::error::{AtobusuError, Result};

const LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "warning", "error", "critical"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(ConfigFormat::Json),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            other => Err(AtobusuError::configuration(format!(
                "Unsupported config file format: .{}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtobusuConfig {
    pub template_directory: PathBuf,
    pub output_directory: PathBuf,
    pub character_conversion_rules: ConversionRuleSet,
    pub log_level: String,
    pub template_encoding: Encoding,
    pub output_encoding: Encoding,
    /// Copy an existing output file to `<file>.bak` before overwriting it.
    pub backup_existing: bool,
}

impl Default for AtobusuConfig {
    fn default() -> Self {
        Self {
            template_directory: PathBuf::from("templates"),
            output_directory: PathBuf::from("output"),
            character_conversion_rules: ConversionRuleSet::default(),
            log_level: "info".to_string(),
            template_encoding: Encoding::Utf8,
            output_encoding: Encoding::Utf8,
            backup_existing: false,
        }
    }
}

impl AtobusuConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|e| {
            AtobusuError::configuration(format!("Configuration file not found: {}", path.display()))
                .with_details(e)
        })?;
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(&text)
                .map_err(|e| AtobusuError::configuration("Invalid configuration file format").with_details(e))?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Option<Self>>(&text)
                .map_err(|e| AtobusuError::configuration("Invalid configuration file format").with_details(e))?
                .unwrap_or_default(),
        };
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let format = ConfigFormat::from_path(path)?;
        let text = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| AtobusuError::configuration("Failed to serialize configuration").with_details(e))?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| AtobusuError::configuration("Failed to serialize configuration").with_details(e))?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AtobusuError::configuration(format!("Cannot create directory {}", parent.display()))
                    .with_details(e)
            })?;
        }
        fs::write(path, text).map_err(|e| {
            AtobusuError::configuration(format!("Failed to write configuration: {}", path.display()))
                .with_details(e)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AtobusuError::configuration(format!("Invalid log level: {}", self.log_level)));
        }
        for (name, dir) in [("template_directory", &self.template_directory), ("output_directory", &self.output_directory)] {
            if dir.as_os_str().is_empty() {
                return Err(AtobusuError::configuration(format!("'{}' must not be empty", name)));
            }
        }
        Ok(())
    }

    pub fn template_path(&self, template_name: &str) -> PathBuf {
        self.template_directory.join(template_name)
    }

    pub fn output_path(&self, output_name: &str) -> PathBuf {
        self.output_directory.join(output_name)
    }
}
