use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use meshcall_mesh::MeshConfig;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Participant name; a random one is generated when absent
    pub participant: Option<String>,
    pub mesh: MeshConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // An explicitly named file must exist
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MESHCALL_MESH__SIGNALING__BASE_URL, MESHCALL_LOGGING__LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("MESHCALL")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("mesh.ice_servers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check for misconfigurations; returns every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.mesh.validate();

        if let Some(name) = &self.participant {
            if name.trim().is_empty() {
                errors.push("participant must not be empty".to_string());
            } else if name == meshcall_mesh::SERVER_PARTICIPANT
                || name == meshcall_mesh::LOCAL_PARTICIPANT
            {
                errors.push(format!("participant name '{name}' is reserved"));
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
