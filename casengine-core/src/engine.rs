//! Capability traits for CAS engines.
//!
//! A backend implements whichever subset it supports. Call sites should ask for
//! the narrowest capability they need, so read-only backends stay usable
//! wherever only [`Reader`] is required.

use crate::digest::{Algorithm, Digest};
use crate::error::Result;
use crate::pagination::Page;
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Lazily-read blob content. Dropping it releases the underlying handle.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

pub type AlgorithmCallback<'a> = &'a mut (dyn FnMut(Algorithm) -> Result<()> + Send);

pub type DigestCallback<'a> = &'a mut (dyn FnMut(Digest) -> Result<()> + Send);

#[async_trait]
pub trait Reader: Send + Sync {
    /// Open the blob stored for `digest`.
    ///
    /// Fails with [`CasError::NotFound`](crate::CasError::NotFound) when there
    /// is no such blob. The returned bytes are not verified against `digest`;
    /// wrap them in a [`VerifyingReader`](crate::VerifyingReader) for that.
    async fn get(&self, digest: &Digest) -> Result<BlobReader>;
}

#[async_trait]
pub trait Writer: Send + Sync {
    /// Store everything read from `reader` and return its digest under
    /// `algorithm`, or the engine default when `None`.
    ///
    /// Either the blob lands at its final location or nothing does.
    async fn put(
        &self,
        algorithm: Option<Algorithm>,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Digest>;
}

#[async_trait]
pub trait Deleter: Send + Sync {
    /// Remove the blob for `digest`. Removing an absent blob succeeds.
    async fn delete(&self, digest: &Digest) -> Result<()>;
}

#[async_trait]
pub trait AlgorithmLister: Send + Sync {
    async fn algorithms(&self, page: &Page, callback: AlgorithmCallback<'_>) -> Result<()>;
}

#[async_trait]
pub trait DigestLister: Send + Sync {
    /// Enumerate stored digests, restricted to `algorithm` when set. The page
    /// prefix is matched against the encoded part.
    async fn digests(
        &self,
        algorithm: Option<Algorithm>,
        page: &Page,
        callback: DigestCallback<'_>,
    ) -> Result<()>;
}

#[async_trait]
pub trait Closer: Send + Sync {
    /// Release engine resources. Every later call on the engine fails.
    async fn close(&self) -> Result<()>;
}

pub trait ReadCloser: Reader + Closer {}

impl<T: Reader + Closer + ?Sized> ReadCloser for T {}

/// Full read/write engine.
pub trait Engine: Reader + Writer + Deleter + AlgorithmLister + Closer {}

impl<T: Reader + Writer + Deleter + AlgorithmLister + Closer + ?Sized> Engine for T {}

pub trait DigestListerEngine: Engine + DigestLister {}

impl<T: Engine + DigestLister + ?Sized> DigestListerEngine for T {}
