use crate::digest::Digest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    #[error("template expansion failed: {0}")]
    TemplateExpansion(String),

    #[error("malformed extractor: {0}")]
    MalformedExtractor(String),

    #[error("{path:?} does not match {pattern:?}")]
    NoMatch { path: String, pattern: String },

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// Uniform "no content at this digest" sentinel across backends.
    #[error("blob not found: {0}")]
    NotFound(Digest),

    #[error("requested {location} but got {status}")]
    Transport { location: String, status: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("CAS-template config is not an object: {0}")]
    ConfigNotObject(String),

    #[error("CAS-template config missing required 'uri' property: {0}")]
    MissingUri(String),

    #[error("CAS-template config 'uri' is not a string: {0}")]
    UriNotString(String),

    #[error("unsupported CAS-engine protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Error returned by an enumeration callback, propagated as-is.
    #[error("enumeration callback failed: {0}")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("engine is closed")]
    Closed,

    #[error("glob error: {0}")]
    Glob(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CasError {
    /// Wrap an arbitrary caller error so it can abort an enumeration.
    pub fn callback<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        CasError::Callback(error.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CasError::NotFound(_))
    }
}

impl From<reqwest::Error> for CasError {
    fn from(error: reqwest::Error) -> Self {
        CasError::Http(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CasError>;
