use crate::engine::ReadCloser;
use crate::error::{CasError, Result};
use crate::storage::TemplateEngine;
use serde_json::Value;
use std::path::PathBuf;
use url::Url;

pub const TEMPLATE_PROTOCOL: &str = "oci-cas-template-v1";

pub const SUPPORTED_PROTOCOLS: &[&str] = &[TEMPLATE_PROTOCOL];

/// Constructs a read engine from an engine reference.
///
/// The protocol string selects the constructor; the remaining config is
/// handed to it untouched.
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    protocol: Option<String>,
    base: Option<Url>,
    config: Option<Value>,
    file_root: Option<PathBuf>,
    client: Option<reqwest::Client>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Location relative engine addresses resolve against.
    pub fn base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_supported(protocol: &str) -> bool {
        SUPPORTED_PROTOCOLS.contains(&protocol.trim())
    }

    fn resolve_protocol(&self) -> Result<&str> {
        let protocol = self.protocol.as_deref().unwrap_or_default().trim();
        if protocol.is_empty() {
            return Err(CasError::Config(
                "engine protocol cannot be empty".to_string(),
            ));
        }

        Ok(protocol)
    }

    pub fn build(&self) -> Result<Box<dyn ReadCloser>> {
        let protocol = self.resolve_protocol()?;

        match protocol {
            TEMPLATE_PROTOCOL => {
                let config = self.config.as_ref().ok_or_else(|| {
                    CasError::Config(format!("config is required for {protocol} engines"))
                })?;

                let mut engine = TemplateEngine::from_config(self.base.clone(), config)?;
                if let Some(root) = &self.file_root {
                    engine = engine.with_file_root(root);
                }
                if let Some(client) = &self.client {
                    engine = engine.with_client(client.clone());
                }

                tracing::debug!(
                    "Built {} engine for template {}",
                    protocol,
                    engine.template()
                );
                Ok(Box::new(engine))
            }
            other => Err(CasError::UnsupportedProtocol(other.to_string())),
        }
    }
}
