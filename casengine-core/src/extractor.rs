use crate::digest::Digest;
use crate::error::{CasError, Result};
use regex::Regex;

/// Recovers a digest from a storage path relative to an engine root.
///
/// This is the inverse of template expansion for one particular layout and is
/// always supplied by the caller. Paths use `/` separators.
pub trait DigestExtractor: Send + Sync {
    fn extract(&self, path: &str) -> Result<Digest>;
}

impl<F> DigestExtractor for F
where
    F: Fn(&str) -> Result<Digest> + Send + Sync,
{
    fn extract(&self, path: &str) -> Result<Digest> {
        self(path)
    }
}

/// Extractor backed by a regular expression with `algorithm` and `encoded`
/// named capture groups.
#[derive(Debug, Clone)]
pub struct RegexDigestExtractor {
    regex: Regex,
}

impl RegexDigestExtractor {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| CasError::MalformedExtractor(format!("{pattern:?}: {e}")))?;
        Self::from_regex(regex)
    }

    pub fn from_regex(regex: Regex) -> Result<Self> {
        for group in ["algorithm", "encoded"] {
            if !regex.capture_names().flatten().any(|name| name == group) {
                return Err(CasError::MalformedExtractor(format!(
                    "no '{}' capturing group in {:?}",
                    group,
                    regex.as_str()
                )));
            }
        }
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl DigestExtractor for RegexDigestExtractor {
    fn extract(&self, path: &str) -> Result<Digest> {
        let no_match = || CasError::NoMatch {
            path: path.to_string(),
            pattern: self.regex.as_str().to_string(),
        };

        let captures = self.regex.captures(path).ok_or_else(no_match)?;
        let algorithm = captures.name("algorithm").ok_or_else(no_match)?;
        let encoded = captures.name("encoded").ok_or_else(no_match)?;

        Digest::parse(&format!("{}:{}", algorithm.as_str(), encoded.as_str()))
    }
}
