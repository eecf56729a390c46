use super::local;
use crate::digest::{Algorithm, Digest};
use crate::engine::{
    AlgorithmCallback, AlgorithmLister, BlobReader, Closer, Deleter, DigestCallback, DigestLister,
    Reader, Writer,
};
use crate::error::{CasError, Result};
use crate::extractor::DigestExtractor;
use crate::hashing::copy_and_hash;
use crate::pagination::{Page, paginate};
use crate::template::AddressTemplate;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncRead;
use url::Url;

const SCRATCH_PREFIX: &str = ".casengine-";
const TEMP_BLOB_PREFIX: &str = "blob-";

/// CAS engine storing blobs as files under a local root.
///
/// Blob paths come from an [`AddressTemplate`] resolved against `file:///`
/// and joined onto the root, e.g. `blobs/{algorithm}/{encoded:2}/{encoded}`.
/// Puts stream into a private scratch directory under the root and are renamed
/// into place once the digest is known.
pub struct DirEngine {
    root: PathBuf,
    base: Url,
    template: AddressTemplate,
    extractor: Option<Arc<dyn DigestExtractor>>,
    algorithm: Algorithm,
    scratch: RwLock<Option<TempDir>>,
}

impl DirEngine {
    pub fn new(root: impl Into<PathBuf>, template: &str) -> Result<Self> {
        let root = root.into();
        let template = AddressTemplate::compile(template)?;
        let base = Url::parse("file:///")
            .map_err(|e| CasError::InvalidLocation(format!("file:///: {e}")))?;

        // Reject templates that cannot land under the root before touching disk.
        let glob = template.glob(None, Some(&base))?;
        local::relative_path(&glob)?;

        std::fs::create_dir_all(&root)?;
        // Glob matches come back normalized, so the root must be too.
        let root = std::fs::canonicalize(&root)?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&root)?;

        tracing::debug!(
            "Opened directory engine at {:?} with template {} (scratch {:?})",
            root,
            template,
            scratch.path()
        );

        Ok(Self {
            root,
            base,
            template,
            extractor: None,
            algorithm: Algorithm::default(),
            scratch: RwLock::new(Some(scratch)),
        })
    }

    /// Enable digest listing with the given reverse mapping.
    pub fn with_extractor(mut self, extractor: impl DigestExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Algorithm used by `put` when the caller does not pick one.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template(&self) -> &AddressTemplate {
        &self.template
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Canonical file path for `digest`.
    pub fn blob_path(&self, digest: &Digest) -> Result<PathBuf> {
        let location = self.template.expand(digest, Some(&self.base))?;
        local::resolve_path(&self.root, &location)
    }

    fn scratch_dir(&self) -> Result<PathBuf> {
        self.scratch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|scratch| scratch.path().to_path_buf())
            .ok_or(CasError::Closed)
    }

    fn glob_pattern(&self, algorithm: Option<Algorithm>) -> Result<String> {
        let location = self.template.glob(algorithm, Some(&self.base))?;
        let relative = local::relative_path(&location)?;
        let root = self.root.to_str().ok_or_else(|| {
            CasError::InvalidLocation(format!("root {:?} is not valid UTF-8", self.root))
        })?;
        Ok(format!(
            "{}/{}",
            glob::Pattern::escape(root.trim_end_matches('/')),
            relative
        ))
    }
}

#[async_trait]
impl Reader for DirEngine {
    async fn get(&self, digest: &Digest) -> Result<BlobReader> {
        self.scratch_dir()?;
        let path = self.blob_path(digest)?;

        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(CasError::NotFound(digest.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl Writer for DirEngine {
    async fn put(
        &self,
        algorithm: Option<Algorithm>,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Digest> {
        let scratch = self.scratch_dir()?;
        let algorithm = algorithm.unwrap_or(self.algorithm);

        // The TempPath removes the file on drop, which covers both early
        // returns and a dropped (cancelled) future.
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(TEMP_BLOB_PREFIX)
            .tempfile_in(&scratch)?
            .into_parts();
        let mut file = fs::File::from_std(file);
        let mut digester = algorithm.digester();

        let size = match copy_and_hash(reader, &mut file, &mut digester).await {
            Ok(size) => size,
            Err(error) => {
                drop(file);
                if let Err(remove_error) = temp_path.close() {
                    tracing::error!(
                        "Failed to remove temporary blob after failed put: {}",
                        remove_error
                    );
                }
                return Err(error);
            }
        };
        file.sync_all().await?;
        drop(file);

        let digest = digester.finalize();
        let path = self.blob_path(&digest)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        temp_path
            .persist(&path)
            .map_err(|error| CasError::Io(error.error))?;

        tracing::debug!("Stored blob {} ({} bytes) at {:?}", digest, size, path);
        Ok(digest)
    }
}

#[async_trait]
impl Deleter for DirEngine {
    async fn delete(&self, digest: &Digest) -> Result<()> {
        self.scratch_dir()?;
        let path = self.blob_path(digest)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {} at {:?}", digest, path);
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl AlgorithmLister for DirEngine {
    async fn algorithms(&self, page: &Page, callback: AlgorithmCallback<'_>) -> Result<()> {
        self.scratch_dir()?;
        paginate(page, Algorithm::ALL, |algorithm| algorithm.as_str(), callback)
    }
}

#[async_trait]
impl DigestLister for DirEngine {
    async fn digests(
        &self,
        algorithm: Option<Algorithm>,
        page: &Page,
        callback: DigestCallback<'_>,
    ) -> Result<()> {
        let extractor = self.extractor.as_deref().ok_or_else(|| {
            CasError::MalformedExtractor("directory engine has no digest extractor".to_string())
        })?;
        self.scratch_dir()?;
        if page.is_empty() {
            return Ok(());
        }

        let pattern = self.glob_pattern(algorithm)?;
        let options = glob::MatchOptions {
            require_literal_leading_dot: true,
            ..Default::default()
        };
        let matches =
            glob::glob_with(&pattern, options).map_err(|e| CasError::Glob(e.to_string()))?;

        let candidates = matches.filter_map(|entry| {
            let path = match entry {
                Ok(path) => path,
                Err(error) => {
                    tracing::warn!("Cannot read glob match under {:?}: {}", self.root, error);
                    return None;
                }
            };
            if !path.is_file() {
                return None;
            }

            let Some(relative) = local::strip_root(&self.root, &path) else {
                tracing::warn!("Cannot compute relative digest path for {:?}", path);
                return None;
            };

            match self.template.match_path(&relative, extractor) {
                Ok(digest) => Some(digest),
                Err(error) => {
                    tracing::warn!("Cannot compute digest for {:?}: {}", relative, error);
                    None
                }
            }
        });

        let candidates =
            candidates.filter(|digest| algorithm.is_none_or(|a| digest.algorithm() == a));

        paginate(page, candidates, |digest| digest.encoded(), callback)
    }
}

#[async_trait]
impl Closer for DirEngine {
    async fn close(&self) -> Result<()> {
        let scratch = self
            .scratch
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(CasError::Closed)?;

        tracing::debug!("Closing directory engine at {:?}", self.root);
        scratch.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, ReadBuf};

    const HELLO_SHA256: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_SHA512: &str = "sha512:374d794a95cdcfd8b35993185fef9ba368f160d8daf432d08ba9f1ed1e5abe6cc69291e0fa2fe0006a52570ef18c19def4e617c33ce52ef0a6e5fbe318cb0387";
    const LAYOUT: &str = "blobs/{algorithm}/{encoded:2}/{encoded}";
    const LAYOUT_PATTERN: &str = r"^blobs/(?P<algorithm>[a-z0-9+._-]+)/[a-zA-Z0-9=_-]{1,2}/(?P<encoded>[a-zA-Z0-9=_-]{1,})$";

    fn open_engine(root: &Path) -> DirEngine {
        let extractor = crate::RegexDigestExtractor::new(LAYOUT_PATTERN).unwrap();
        DirEngine::new(root, LAYOUT).unwrap().with_extractor(extractor)
    }

    async fn put_str(engine: &DirEngine, algorithm: Option<Algorithm>, body: &str) -> Digest {
        let mut reader = body.as_bytes();
        engine.put(algorithm, &mut reader).await.unwrap()
    }

    async fn read_all(engine: &DirEngine, digest: &Digest) -> String {
        let mut reader = engine.get(digest).await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        body
    }

    async fn list_algorithms(engine: &DirEngine, page: Page) -> Vec<String> {
        let mut out = Vec::new();
        engine
            .algorithms(&page, &mut |algorithm| {
                out.push(algorithm.to_string());
                Ok(())
            })
            .await
            .unwrap();
        out
    }

    async fn list_digests(
        engine: &DirEngine,
        algorithm: Option<Algorithm>,
        page: Page,
    ) -> Vec<String> {
        let mut out = Vec::new();
        engine
            .digests(algorithm, &page, &mut |digest| {
                out.push(digest.to_string());
                Ok(())
            })
            .await
            .unwrap();
        out
    }

    fn scratch_entries(engine: &DirEngine) -> usize {
        std::fs::read_dir(engine.scratch_dir().unwrap())
            .unwrap()
            .count()
    }

    #[tokio::test]
    async fn test_put_get_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());

        let digest = put_str(&engine, None, "Hello, World!").await;
        assert_eq!(digest.to_string(), HELLO_SHA256);

        let expected_path = engine
            .root()
            .join("blobs/sha256/df/dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f");
        assert_eq!(engine.blob_path(&digest).unwrap(), expected_path);
        assert_eq!(
            std::fs::read_to_string(&expected_path).unwrap(),
            "Hello, World!"
        );
        assert_eq!(read_all(&engine, &digest).await, "Hello, World!");
        assert_eq!(scratch_entries(&engine), 0);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_algorithms() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());

        let explicit = put_str(&engine, Some(Algorithm::Sha256), "Hello, World!").await;
        let default = put_str(&engine, None, "Hello, World!").await;
        assert_eq!(explicit, default);

        let sha512 = put_str(&engine, Some(Algorithm::Sha512), "Hello, World!").await;
        assert_eq!(sha512.to_string(), HELLO_SHA512);

        let engine = engine.with_algorithm(Algorithm::Sha512);
        assert_eq!(put_str(&engine, None, "Hello, World!").await, sha512);

        let empty = put_str(&engine, Some(Algorithm::Sha256), "").await;
        assert_eq!(empty.to_string(), EMPTY_SHA256);
        assert_eq!(read_all(&engine, &empty).await, "");
    }

    #[tokio::test]
    async fn test_round_trip_verifies() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        for algorithm in Algorithm::ALL {
            let mut reader = &body[..];
            let digest = engine.put(Some(algorithm), &mut reader).await.unwrap();
            assert_eq!(digest, algorithm.digest_bytes(&body));

            let raw = engine.get(&digest).await.unwrap();
            let mut verifier = crate::VerifyingReader::new(raw, digest.clone());
            let mut out = Vec::new();
            verifier.read_to_end(&mut out).await.unwrap();
            assert!(verifier.verified());
            assert_eq!(out, body);
        }
    }

    #[tokio::test]
    async fn test_get_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        let digest = Digest::parse(EMPTY_SHA256).unwrap();

        let error = engine.get(&digest).await.err().unwrap();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        let digest = put_str(&engine, None, "Hello, World!").await;

        engine.delete(&digest).await.unwrap();
        assert!(engine.get(&digest).await.err().unwrap().is_not_found());
        engine.delete(&digest).await.unwrap();
    }

    #[tokio::test]
    async fn test_algorithms() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());

        let cases: [(&str, Option<usize>, usize, &[&str]); 5] = [
            ("", Some(0), 0, &[]),
            ("", None, 0, &["sha256", "sha384", "sha512"]),
            ("", Some(1), 0, &["sha256"]),
            ("", Some(2), 1, &["sha384", "sha512"]),
            ("sha5", None, 0, &["sha512"]),
        ];
        for (prefix, size, from, expected) in cases {
            let page = Page::new(prefix, size, from);
            assert_eq!(list_algorithms(&engine, page).await, expected, "{prefix:?},{size:?},{from}");
        }
    }

    #[tokio::test]
    async fn test_digests() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        put_str(&engine, None, "Hello, World!").await;
        put_str(&engine, Some(Algorithm::Sha512), "Hello, World!").await;
        put_str(&engine, None, "").await;

        let cases: [(Option<Algorithm>, &str, Option<usize>, usize, &[&str]); 6] = [
            (None, "", Some(0), 0, &[]),
            (None, "", None, 0, &[HELLO_SHA256, EMPTY_SHA256, HELLO_SHA512]),
            (Some(Algorithm::Sha256), "", None, 0, &[HELLO_SHA256, EMPTY_SHA256]),
            (Some(Algorithm::Sha256), "e", None, 0, &[EMPTY_SHA256]),
            (None, "", Some(2), 0, &[HELLO_SHA256, EMPTY_SHA256]),
            (None, "", Some(2), 1, &[EMPTY_SHA256, HELLO_SHA512]),
        ];
        for (algorithm, prefix, size, from, expected) in cases {
            let page = Page::new(prefix, size, from);
            assert_eq!(
                list_digests(&engine, algorithm, page).await,
                expected,
                "{algorithm:?},{prefix:?},{size:?},{from}"
            );
        }
    }

    #[tokio::test]
    async fn test_digests_relative_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let target = temp_dir.path().join("store");

        // Spell the same directory as "./../../<tmp>/store" relative to the cwd.
        let cwd = std::env::current_dir().unwrap();
        let mut relative = PathBuf::from(".");
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        relative.push(target.strip_prefix("/").unwrap());

        let engine = open_engine(&relative);
        assert!(engine.root().is_absolute());
        put_str(&engine, None, "Hello, World!").await;

        assert_eq!(list_digests(&engine, None, Page::all()).await, [HELLO_SHA256]);
        assert!(target.join("blobs/sha256/df").exists());
    }

    #[tokio::test]
    async fn test_digests_skip_foreign_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        put_str(&engine, None, "").await;

        let foreign = temp_dir.path().join("blobs/sha256/zz");
        std::fs::create_dir_all(&foreign).unwrap();
        std::fs::write(foreign.join("not-a-digest"), b"junk").unwrap();
        let unknown = temp_dir.path().join("blobs/md5/d4");
        std::fs::create_dir_all(&unknown).unwrap();
        std::fs::write(unknown.join("d41d8cd98f00b204e9800998ecf8427e"), b"").unwrap();

        assert_eq!(list_digests(&engine, None, Page::all()).await, [EMPTY_SHA256]);
    }

    #[tokio::test]
    async fn test_digests_callback_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        put_str(&engine, None, "Hello, World!").await;
        put_str(&engine, None, "").await;

        let mut calls = 0;
        let error = engine
            .digests(None, &Page::all(), &mut |_| {
                calls += 1;
                Err(CasError::callback("enough"))
            })
            .await
            .unwrap_err();
        assert!(matches!(error, CasError::Callback(_)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_digests_without_extractor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = DirEngine::new(temp_dir.path(), LAYOUT).unwrap();

        let error = engine
            .digests(None, &Page::all(), &mut |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(error, CasError::MalformedExtractor(_)));
    }

    #[tokio::test]
    async fn test_failed_put_leaves_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());

        let mut reader = tokio_test::io::Builder::new()
            .read(b"Hello, ")
            .read_error(std::io::Error::other("connection reset"))
            .build();
        let error = engine.put(None, &mut reader).await.unwrap_err();
        assert!(matches!(error, CasError::Io(_)));

        assert_eq!(scratch_entries(&engine), 0);
        assert!(!temp_dir.path().join("blobs").exists());
    }

    /// Yields some bytes, then never completes.
    struct Stalled {
        sent: bool,
    }

    impl AsyncRead for Stalled {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.sent {
                return Poll::Pending;
            }
            self.sent = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_cancelled_put_leaves_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());

        let mut reader = Stalled { sent: false };
        let result =
            tokio::time::timeout(Duration::from_millis(50), engine.put(None, &mut reader)).await;
        assert!(result.is_err());

        assert_eq!(scratch_entries(&engine), 0);
        assert!(!temp_dir.path().join("blobs").exists());
    }

    #[tokio::test]
    async fn test_close() {
        let temp_dir = tempfile::tempdir().unwrap();
        let engine = open_engine(temp_dir.path());
        let digest = put_str(&engine, None, "Hello, World!").await;
        let scratch = engine.scratch_dir().unwrap();
        assert!(scratch.starts_with(engine.root()));

        engine.close().await.unwrap();
        assert!(!scratch.exists());

        assert!(matches!(engine.get(&digest).await, Err(CasError::Closed)));
        let mut reader = &b"x"[..];
        assert!(matches!(
            engine.put(None, &mut reader).await,
            Err(CasError::Closed)
        ));
        assert!(matches!(engine.delete(&digest).await, Err(CasError::Closed)));
        assert!(matches!(
            engine.algorithms(&Page::all(), &mut |_| Ok(())).await,
            Err(CasError::Closed)
        ));
        assert!(matches!(engine.close().await, Err(CasError::Closed)));

        // Stored content outlives the engine.
        assert!(
            temp_dir
                .path()
                .join("blobs/sha256/df")
                .join(digest.encoded())
                .exists()
        );
    }

    #[test]
    fn test_new_rejects_bad_templates() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DirEngine::new(temp_dir.path(), "blobs/{algorithm"),
            Err(CasError::MalformedTemplate(_))
        ));
        assert!(matches!(
            DirEngine::new(temp_dir.path(), "https://example.com/{encoded}"),
            Err(CasError::InvalidLocation(_))
        ));
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
