//! Streaming hash helpers shared by writers and verifying readers.

use crate::digest::{Digest, Digester};
use crate::error::Result;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer`, feeding every chunk to `digester` before the
/// next read. Returns the number of bytes copied.
pub async fn copy_and_hash<R, W>(
    reader: &mut R,
    writer: &mut W,
    digester: &mut Digester,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        digester.update(&buf[..n]);
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Reader that hashes everything read through it.
///
/// Engines do not verify what they return. Callers that need integrity wrap
/// the stream, drain it, then check [`VerifyingReader::verified`]:
///
/// ```no_run
/// # async fn example(
/// #     engine: &dyn casengine_core::Reader,
/// #     digest: &casengine_core::Digest,
/// # ) -> casengine_core::Result<()> {
/// use tokio::io::AsyncReadExt;
///
/// let raw = engine.get(digest).await?;
/// let mut reader = casengine_core::VerifyingReader::new(raw, digest.clone());
/// let mut body = Vec::new();
/// reader.read_to_end(&mut body).await?;
/// assert!(reader.verified());
/// # Ok(())
/// # }
/// ```
pub struct VerifyingReader<R> {
    inner: R,
    digester: Digester,
    expected: Digest,
    bytes_read: u64,
}

impl<R> VerifyingReader<R> {
    pub fn new(inner: R, expected: Digest) -> Self {
        Self {
            inner,
            digester: expected.algorithm().digester(),
            expected,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Digest of everything read so far.
    pub fn digest(&self) -> Digest {
        self.digester.clone().finalize()
    }

    /// Whether the bytes read so far hash to the expected digest. Only
    /// meaningful once the stream has been drained.
    pub fn verified(&self) -> bool {
        self.digest().encoded() == self.expected.encoded()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> AsyncRead for VerifyingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let fresh = &buf.filled()[before..];
            this.digester.update(fresh);
            this.bytes_read += fresh.len() as u64;
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    const HELLO_SHA256: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[tokio::test]
    async fn test_streaming_validation_good() {
        let digest = Digest::parse(HELLO_SHA256).unwrap();
        let mut reader = VerifyingReader::new(&b"Hello, World!"[..], digest);
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();

        assert!(reader.verified());
        assert_eq!(reader.bytes_read(), 13);
        assert_eq!(body, "Hello, World!");
    }

    #[tokio::test]
    async fn test_streaming_validation_bad() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        let mut reader = VerifyingReader::new(&b"Hello, World!"[..], digest);
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();

        assert!(!reader.verified());
        assert_eq!(body, "Hello, World!");
    }

    #[tokio::test]
    async fn test_copy_and_hash() {
        let mut reader = &b"Hello, World!"[..];
        let mut sink = Vec::new();
        let mut digester = Algorithm::Sha256.digester();

        let copied = copy_and_hash(&mut reader, &mut sink, &mut digester)
            .await
            .unwrap();

        assert_eq!(copied, 13);
        assert_eq!(sink, b"Hello, World!");
        assert_eq!(digester.finalize().to_string(), HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_copy_and_hash_surfaces_read_error() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"Hello")
            .read_error(io::Error::other("boom"))
            .build();
        let mut sink = Vec::new();
        let mut digester = Algorithm::Sha256.digester();

        let result = copy_and_hash(&mut reader, &mut sink, &mut digester).await;

        assert!(result.is_err());
        assert_eq!(sink, b"Hello");
    }
}
