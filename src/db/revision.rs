//! Revision tokens: `<generation>-<digest>`.

use std::cmp::Ordering;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::errors::StoreError;
use crate::models::Body;

const DIGEST_BYTES: usize = 16;

/// A parsed revision token.
///
/// Revisions order by generation, then by digest. The greater revision wins
/// when two peers disagree about a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub generation: u64,
    pub digest: String,
}

impl Revision {
    pub fn parse(token: &str) -> Result<Self, StoreError> {
        let malformed = || StoreError::BadRequest(format!("Invalid rev format: {}", token));

        let (generation, digest) = token.split_once('-').ok_or_else(malformed)?;
        let generation: u64 = generation.parse().map_err(|_| malformed())?;
        if generation == 0
            || digest.is_empty()
            || !digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(malformed());
        }

        Ok(Self {
            generation,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// The revision that follows `previous` for the given content.
    pub fn next(previous: Option<&Revision>, deleted: bool, body: &Body) -> Self {
        let generation = previous.map(|rev| rev.generation + 1).unwrap_or(1);

        let mut hasher = Sha256::new();
        if let Some(previous) = previous {
            hasher.update(previous.to_string().as_bytes());
        }
        hasher.update([deleted as u8]);
        // serde_json maps are key-ordered, so the encoding is canonical.
        hasher.update(serde_json::Value::Object(body.clone()).to_string().as_bytes());
        let digest = hasher.finalize();

        Self {
            generation,
            digest: hex::encode(&digest[..DIGEST_BYTES]),
        }
    }

    pub fn beats(&self, other: &Revision) -> bool {
        self > other
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}
