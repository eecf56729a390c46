use crate::error::{CasError, Result};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use url::Url;

/// Root-relative, `/`-separated path for a `file` location.
///
/// Only plain `file:///...` locations are accepted: no host, credentials,
/// query or fragment, and no segment may climb out of the root.
pub fn relative_path(location: &Url) -> Result<String> {
    let invalid = |reason: &str| CasError::InvalidLocation(format!("{location}: {reason}"));

    if location.scheme() != "file" {
        return Err(invalid("not a file location"));
    }
    if location.host_str().is_some_and(|host| !host.is_empty()) {
        return Err(invalid("file location has a host"));
    }
    if !location.username().is_empty() || location.password().is_some() {
        return Err(invalid("file location has credentials"));
    }
    if location.query().is_some() || location.fragment().is_some() {
        return Err(invalid("file location has a query or fragment"));
    }

    let segments = location
        .path_segments()
        .ok_or_else(|| invalid("file location has no path"))?;

    let mut parts = Vec::new();
    for segment in segments.filter(|segment| !segment.is_empty()) {
        let decoded = percent_decode_str(segment)
            .decode_utf8()
            .map_err(|_| invalid("path is not valid UTF-8"))?;
        if decoded == "." || decoded == ".." || decoded.contains(['/', '\\', '\0']) {
            return Err(invalid("path segment escapes the root"));
        }
        parts.push(decoded.into_owned());
    }

    if parts.is_empty() {
        return Err(invalid("file location names the root itself"));
    }

    Ok(parts.join("/"))
}

/// Filesystem path of a `file` location under `root`.
pub fn resolve_path(root: &Path, location: &Url) -> Result<PathBuf> {
    let relative = relative_path(location)?;
    Ok(relative.split('/').fold(root.to_path_buf(), |path, part| path.join(part)))
}

/// Root-relative, `/`-separated form of a path found under `root`.
pub fn strip_root(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
