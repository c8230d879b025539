//! Content digests for blobs and manifests.
//!
//! A [`Digest`] is the `<algorithm>:<hex>` identifier that addresses every
//! blob in the registry. A [`Verifier`] is a single-use hashing sink for
//! checking streamed bytes against an expected digest without buffering
//! them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};

/// Errors produced when parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    /// The string has no `<algorithm>:<hex>` separator.
    #[error("invalid digest format: {0:?}")]
    Format(String),

    /// The algorithm is not one the registry supports.
    #[error("unsupported digest algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    /// The hex payload has the wrong length or is not lowercase hex.
    #[error("invalid {algorithm} hex payload: {hex:?}")]
    InvalidHex {
        /// Algorithm named by the digest string.
        algorithm: Algorithm,
        /// The offending payload.
        hex: String,
    },
}

/// Hash algorithms understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Expected length of the lowercase hex payload.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, validated content digest.
///
/// Serializes as its `<algorithm>:<hex>` string form and re-validates on
/// deserialization, so a `Digest` in hand is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::Format(s.to_string()))?;

        let algorithm = match algorithm {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        };

        let valid_hex = hex.len() == algorithm.hex_len()
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !valid_hex {
            return Err(DigestError::InvalidHex {
                algorithm,
                hex: hex.to_string(),
            });
        }

        Ok(Digest {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Canonical digest of an in-memory buffer.
    pub fn from_bytes(data: &[u8]) -> Self {
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Start a verifier for bytes expected to hash to this digest.
    pub fn verifier(&self) -> Verifier {
        let hasher = match self.algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        };
        Verifier {
            hasher,
            expected: self.clone(),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Single-use streaming verifier for an expected [`Digest`].
///
/// Feed it every byte of the transfer with [`Verifier::update`] (or through
/// the [`std::io::Write`] impl) and consume it with [`Verifier::finalize`]
/// to learn whether the bytes hash to the expected digest.
pub struct Verifier {
    hasher: Hasher,
    expected: Digest,
}

impl Verifier {
    /// Accumulate a chunk of the transfer.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Sha512(hasher) => hasher.update(data),
        }
    }

    /// Whether the accumulated bytes hash to the expected digest.
    pub fn finalize(self) -> bool {
        let computed = match self.hasher {
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha512(hasher) => hex::encode(hasher.finalize()),
        };
        computed == self.expected.hex
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

impl std::io::Write for Verifier {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parse_valid_sha256() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(digest.algorithm(), Algorithm::Sha256);
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            Digest::parse("deadbeef"),
            Err(DigestError::Format(_))
        ));
    }

    #[test]
    fn parse_rejects_unknown_algorithm() {
        assert!(matches!(
            Digest::parse("md5:d41d8cd98f00b204e9800998ecf8427e"),
            Err(DigestError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(matches!(
            Digest::parse("sha256:abc123"),
            Err(DigestError::InvalidHex { .. })
        ));
    }

    #[test]
    fn parse_rejects_uppercase_hex() {
        let uppercase = EMPTY_SHA256.to_uppercase().replace("SHA256", "sha256");
        assert!(Digest::parse(&uppercase).is_err());
    }

    #[test]
    fn from_bytes_matches_known_vector() {
        assert_eq!(Digest::from_bytes(b"").to_string(), EMPTY_SHA256);
        assert_eq!(
            Digest::from_bytes(b"hello world").to_string(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn verifier_accepts_matching_bytes() {
        let digest = Digest::from_bytes(b"hello world");
        let mut verifier = digest.verifier();
        verifier.update(b"hello");
        verifier.update(b" world");
        assert!(verifier.finalize());
    }

    #[test]
    fn verifier_rejects_other_bytes() {
        let digest = Digest::from_bytes(b"hello world");
        let mut verifier = digest.verifier();
        verifier.update(b"goodbye");
        assert!(!verifier.finalize());
    }

    #[test]
    fn verifier_as_write_sink() {
        use std::io::Write;

        let digest = Digest::from_bytes(b"streamed");
        let mut verifier = digest.verifier();
        verifier.write_all(b"streamed").unwrap();
        assert!(verifier.finalize());
    }

    #[test]
    fn serde_round_trip() {
        let digest = Digest::from_bytes(b"payload");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{digest}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn serde_rejects_malformed() {
        assert!(serde_json::from_str::<Digest>("\"not-a-digest\"").is_err());
    }
}
