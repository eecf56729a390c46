use super::local;
use crate::digest::Digest;
use crate::engine::{BlobReader, Closer, Reader};
use crate::error::{CasError, Result};
use crate::template::AddressTemplate;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tokio_util::io::StreamReader;
use url::Url;

/// Read-only engine that fetches blobs from the location a template expands to.
///
/// Remote locations are fetched with a plain GET. `file:` locations are only
/// served when a local file root is configured.
#[derive(Debug)]
pub struct TemplateEngine {
    template: AddressTemplate,
    base: Option<Url>,
    client: RwLock<Option<reqwest::Client>>,
    file_root: Option<PathBuf>,
}

impl TemplateEngine {
    pub fn new(base: Option<Url>, template: AddressTemplate) -> Self {
        Self {
            template,
            base,
            client: RwLock::new(Some(reqwest::Client::new())),
            file_root: None,
        }
    }

    /// Build from an engine-reference config object carrying a `uri` template.
    ///
    /// Keys other than `uri` are ignored.
    pub fn from_config(base: Option<Url>, config: &Value) -> Result<Self> {
        let object = config
            .as_object()
            .ok_or_else(|| CasError::ConfigNotObject(config.to_string()))?;
        let uri = object
            .get("uri")
            .ok_or_else(|| CasError::MissingUri(config.to_string()))?;
        let uri = uri
            .as_str()
            .ok_or_else(|| CasError::UriNotString(uri.to_string()))?;

        let template = AddressTemplate::compile(uri)?;
        Ok(Self::new(base, template))
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = RwLock::new(Some(client));
        self
    }

    /// Serve `file:` locations from this directory.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    pub fn template(&self) -> &AddressTemplate {
        &self.template
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Where the blob for `digest` is fetched from.
    pub fn location(&self, digest: &Digest) -> Result<Url> {
        self.template.expand(digest, self.base.as_ref())
    }

    /// The HTTP client, or `Closed` once the engine has been closed.
    fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CasError::Closed)
    }

    async fn open_file(&self, digest: &Digest, location: &Url) -> Result<BlobReader> {
        let root = self.file_root.as_ref().ok_or_else(|| {
            CasError::InvalidLocation(format!("{location}: no local file root configured"))
        })?;
        let path = local::resolve_path(root, location)?;

        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(CasError::NotFound(digest.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn fetch(
        &self,
        client: reqwest::Client,
        digest: &Digest,
        location: Url,
    ) -> Result<BlobReader> {
        let response = client
            .get(location.clone())
            .send()
            .await
            .map_err(|error| CasError::Http(error.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let stream = response.bytes_stream().map_err(std::io::Error::other);
                Ok(Box::pin(StreamReader::new(stream)))
            }
            StatusCode::NO_CONTENT => Ok(Box::pin(tokio::io::empty())),
            StatusCode::NOT_FOUND => Err(CasError::NotFound(digest.clone())),
            status => Err(CasError::Transport {
                location: location.to_string(),
                status: status.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Reader for TemplateEngine {
    async fn get(&self, digest: &Digest) -> Result<BlobReader> {
        let client = self.client()?;
        let location = self.location(digest)?;
        tracing::debug!("Fetching {} from {}", digest, location);

        if location.scheme() == "file" {
            self.open_file(digest, &location).await
        } else {
            self.fetch(client, digest, location).await
        }
    }
}

#[async_trait]
impl Closer for TemplateEngine {
    async fn close(&self) -> Result<()> {
        // Dropping the client releases its pooled connections.
        let client = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CasError::Closed)?;
        drop(client);

        tracing::debug!("Closed template engine for {}", self.template);
        Ok(())
    }
}
