use crate::config::Settings;
use anyhow::Context;
use casengine_core::{Digest, EngineBuilder, ReadCloser, SUPPORTED_PROTOCOLS, VerifyingReader};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

#[derive(Debug, Error)]
pub enum GetError {
    #[error("failed to load any engine configurations")]
    NoEngines,

    #[error("failed to retrieve {0}")]
    NotRetrieved(Digest),
}

/// One entry of the engine-reference list read from stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineReference {
    /// Base that relative engine addresses resolve against.
    #[serde(default)]
    pub uri: Option<Url>,
    pub config: Value,
}

impl EngineReference {
    pub fn protocol(&self) -> &str {
        self.config
            .get("protocol")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

pub fn read_references(reader: impl std::io::Read) -> anyhow::Result<Vec<EngineReference>> {
    serde_json::from_reader(reader).context("failed to read engine config from stdin")
}

/// Build every usable engine, skipping unsupported or broken references.
pub fn load_engines(
    references: &[EngineReference],
    file_root: Option<&Path>,
) -> Vec<Box<dyn ReadCloser>> {
    let mut engines = Vec::new();
    for reference in references {
        let protocol = reference.protocol();
        if !EngineBuilder::is_supported(protocol) {
            tracing::debug!(
                "unsupported CAS-engine protocol {:?} ({:?})",
                protocol,
                SUPPORTED_PROTOCOLS
            );
            continue;
        }

        let mut builder = EngineBuilder::new()
            .protocol(protocol)
            .config(reference.config.clone());
        if let Some(base) = &reference.uri {
            builder = builder.base(base.clone());
        }
        if let Some(root) = file_root {
            builder = builder.file_root(root);
        }

        match builder.build() {
            Ok(engine) => engines.push(engine),
            Err(error) => tracing::warn!(
                "failed to initialize {} CAS engine with {}: {}",
                protocol,
                reference.config,
                error
            ),
        }
    }
    engines
}

/// First verified copy of `digest` across `engines`, in order.
pub async fn fetch_verified(engines: &[Box<dyn ReadCloser>], digest: &Digest) -> Option<Vec<u8>> {
    for (index, engine) in engines.iter().enumerate() {
        tracing::debug!("checking engine {} for {}", index, digest);
        let raw = match engine.get(digest).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!("failed to get {}: {}", digest, error);
                continue;
            }
        };

        let mut reader = VerifyingReader::new(raw, digest.clone());
        let mut body = Vec::new();
        if let Err(error) = reader.read_to_end(&mut body).await {
            tracing::warn!("failed to read {}: {}", digest, error);
            continue;
        }
        if !reader.verified() {
            tracing::warn!("invalid bytes for {}", digest);
            continue;
        }
        return Some(body);
    }
    None
}

pub async fn write_blobs<W>(
    engines: &[Box<dyn ReadCloser>],
    digests: &[String],
    out: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for value in digests {
        let digest =
            Digest::parse(value).with_context(|| format!("failed to parse digest {value}"))?;

        tracing::debug!("getting {} with {} engines", digest, engines.len());
        let body = fetch_verified(engines, &digest)
            .await
            .ok_or_else(|| GetError::NotRetrieved(digest.clone()))?;
        out.write_all(&body).await?;
    }
    out.flush().await?;
    Ok(())
}

pub async fn run(settings: &Settings, digests: &[String]) -> anyhow::Result<()> {
    let references = read_references(std::io::stdin().lock())?;
    let engines = load_engines(&references, settings.file_root.as_deref());
    if engines.is_empty() {
        return Err(GetError::NoEngines.into());
    }

    let mut stdout = tokio::io::stdout();
    let result = write_blobs(&engines, digests, &mut stdout).await;

    for engine in &engines {
        if let Err(error) = engine.close().await {
            tracing::warn!("failed to close engine: {}", error);
        }
    }
    result
}
