use crate::error::{CasError, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms an engine can address content with.
///
/// The declaration order is the ascending order used by algorithm listings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex encoding of this algorithm's output.
    pub const fn encoded_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    pub fn digester(&self) -> Digester {
        match self {
            Algorithm::Sha256 => Digester::Sha256(Sha256::new()),
            Algorithm::Sha384 => Digester::Sha384(Sha384::new()),
            Algorithm::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    /// Hash a complete buffer in one call.
    pub fn digest_bytes(&self, data: &[u8]) -> Digest {
        let mut digester = self.digester();
        digester.update(data);
        digester.finalize()
    }

    fn validate_encoded(&self, encoded: &str) -> bool {
        encoded.len() == self.encoded_len()
            && encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = CasError;

    fn from_str(value: &str) -> Result<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|algorithm| algorithm.as_str() == value)
            .ok_or_else(|| CasError::UnsupportedAlgorithm(value.to_string()))
    }
}

/// Incremental hash accumulator for one algorithm.
#[derive(Clone)]
pub enum Digester {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Digester {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Digester::Sha256(_) => Algorithm::Sha256,
            Digester::Sha384(_) => Algorithm::Sha384,
            Digester::Sha512(_) => Algorithm::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Sha256(hasher) => hasher.update(data),
            Digester::Sha384(hasher) => hasher.update(data),
            Digester::Sha512(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        let algorithm = self.algorithm();
        let encoded = match self {
            Digester::Sha256(hasher) => hex::encode(hasher.finalize()),
            Digester::Sha384(hasher) => hex::encode(hasher.finalize()),
            Digester::Sha512(hasher) => hex::encode(hasher.finalize()),
        };
        Digest { algorithm, encoded }
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Digester").field(&self.algorithm()).finish()
    }
}

/// Algorithm-tagged content hash, `algorithm:encoded`.
///
/// Construction goes through [`Digest::parse`] or a [`Digester`], so a value
/// always carries a supported algorithm and a well-formed encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, encoded) = value
            .split_once(':')
            .ok_or_else(|| CasError::MalformedDigest(value.to_string()))?;

        let algorithm: Algorithm = algorithm
            .parse()
            .map_err(|_| CasError::MalformedDigest(value.to_string()))?;

        if !algorithm.validate_encoded(encoded) {
            return Err(CasError::MalformedDigest(value.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn canonical_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = CasError;

    fn from_str(value: &str) -> Result<Self> {
        Digest::parse(value)
    }
}

impl TryFrom<String> for Digest {
    type Error = CasError;

    fn try_from(value: String) -> Result<Self> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}
