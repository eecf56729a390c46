use crate::error::Result;

/// `(prefix, size, from)` window over an enumeration.
///
/// `size: None` is unbounded, `Some(0)` yields nothing without doing any work.
/// `from` skips that many prefix-matching candidates before the size limit
/// applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub prefix: String,
    pub size: Option<usize>,
    pub from: usize,
}

impl Page {
    pub fn new(prefix: impl Into<String>, size: Option<usize>, from: usize) -> Self {
        Self {
            prefix: prefix.into(),
            size,
            from,
        }
    }

    /// Unfiltered, unbounded window.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.size == Some(0)
    }

    pub fn matches(&self, value: &str) -> bool {
        value.starts_with(&self.prefix)
    }
}

/// Feed `candidates` through the window, invoking `callback` for each one in
/// range. `key` selects the string the prefix is matched against.
///
/// Candidates are pulled lazily and iteration stops as soon as the window is
/// full. A callback error aborts the enumeration and is returned unchanged.
pub fn paginate<T, I, K, F>(page: &Page, candidates: I, key: K, mut callback: F) -> Result<()>
where
    I: IntoIterator<Item = T>,
    K: Fn(&T) -> &str,
    F: FnMut(T) -> Result<()>,
{
    if page.is_empty() {
        return Ok(());
    }

    let mut offset = 0;
    let mut count = 0;
    for candidate in candidates {
        if !page.matches(key(&candidate)) {
            continue;
        }

        if offset >= page.from {
            callback(candidate)?;
            count += 1;
            if page.size.is_some_and(|size| count >= size) {
                return Ok(());
            }
        }
        offset += 1;
    }

    Ok(())
}
