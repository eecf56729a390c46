//! casengine Core - Content-addressable storage engines
//!
//! Blobs are addressed by the digest of their content:
//! - `algorithm:encoded` digests over SHA-256, SHA-384 and SHA-512
//! - URI templates mapping digests to storage locations
//! - a local directory engine with atomic puts and paginated listings
//! - a read-only template engine fetching from HTTP(S) or local files

pub mod digest;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod hashing;
pub mod pagination;
pub mod registry;
pub mod storage;
pub mod template;

pub use digest::{Algorithm, Digest, Digester};
pub use engine::{
    AlgorithmCallback, AlgorithmLister, BlobReader, Closer, Deleter, DigestCallback, DigestLister,
    DigestListerEngine, Engine, ReadCloser, Reader, Writer,
};
pub use error::{CasError, Result};
pub use extractor::{DigestExtractor, RegexDigestExtractor};
pub use hashing::{VerifyingReader, copy_and_hash};
pub use pagination::{Page, paginate};
pub use registry::{EngineBuilder, SUPPORTED_PROTOCOLS, TEMPLATE_PROTOCOL};
pub use storage::{DirEngine, TemplateEngine};
pub use template::AddressTemplate;
