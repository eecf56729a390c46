use casengine_core::{CasError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LOG_LEVEL: &str = "error";

/// Binary settings: defaults, then an optional settings file, then
/// `OCI_CAS_*` environment variables, then command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Effective root for `file:` engine locations. Unset disables them.
    #[serde(default)]
    pub file_root: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Settings {
    pub fn load(
        path: Option<&str>,
        log_level: Option<String>,
        file_root: Option<PathBuf>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .set_default("log_level", DEFAULT_LOG_LEVEL)
            .map_err(|e| CasError::Config(e.to_string()))?;
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(::config::Environment::with_prefix("OCI_CAS"))
            .set_override_option("log_level", log_level)
            .map_err(|e| CasError::Config(e.to_string()))?
            .set_override_option(
                "file_root",
                file_root.map(|root| root.to_string_lossy().into_owned()),
            )
            .map_err(|e| CasError::Config(e.to_string()))?
            .build()
            .map_err(|e| CasError::Config(e.to_string()))?;

        let settings: Settings = settings
            .try_deserialize()
            .map_err(|e| CasError::Config(e.to_string()))?;

        Ok(settings)
    }
}
