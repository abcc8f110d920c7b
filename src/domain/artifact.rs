//! Identifiers for stored PDF artifacts.
//!
//! An identifier is a random UUID v4 rendered in canonical lowercase hyphenated
//! form. Parsing only accepts that exact shape (optionally followed by the
//! artifact file extension), so an identifier can never smuggle a path fragment
//! into the filesystem layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// File extension used for every stored artifact.
pub const ARTIFACT_EXTENSION: &str = "pdf";

const CANONICAL_LEN: usize = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactIdError {
    #[error("artifact identifier is empty")]
    Empty,
    #[error("artifact identifier `{input}` is malformed")]
    Malformed { input: String },
}

/// Opaque, globally unique identifier of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier as it appears in URLs: `<uuid>` or `<uuid>.pdf`.
    pub fn parse(input: &str) -> Result<Self, ArtifactIdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ArtifactIdError::Empty);
        }

        let candidate = trimmed
            .strip_suffix(ARTIFACT_EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(trimmed);

        let malformed = || ArtifactIdError::Malformed {
            input: input.to_string(),
        };

        if candidate.len() != CANONICAL_LEN
            || !candidate
                .bytes()
                .all(|b| b == b'-' || b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(malformed());
        }

        let uuid = Uuid::try_parse(candidate).map_err(|_| malformed())?;
        if uuid.hyphenated().to_string() != candidate {
            return Err(malformed());
        }

        Ok(Self(uuid))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// File name of the artifact inside the store root.
    pub fn file_name(&self) -> String {
        format!("{}.{ARTIFACT_EXTENSION}", self.0.hyphenated())
    }

    /// Two-character shard prefix used when the store fans out into subdirectories.
    pub fn shard(&self) -> String {
        let text = self.0.hyphenated().to_string();
        text[..2].to_string()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ArtifactId {
    type Err = ArtifactIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = ArtifactIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(value: ArtifactId) -> Self {
        value.to_string()
    }
}
