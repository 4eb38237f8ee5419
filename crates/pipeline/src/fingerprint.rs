//! Fingerprint Generator.
//!
//! Turns a normalized [`QueryFilters`] into a short, stable identifier used
//! as the cache key and as the correlation anchor in decision traces.
//!
//! The canonical form lists every recognized key in a fixed order, with
//! unconstrained keys as empty values, and length-prefixes each value:
//!
//! ```text
//! v1|age_group=1:7|genre=7:fantasy|language=2:en|year_category=0:
//! ```
//!
//! Insertion order of the original pairs therefore never matters, and no
//! value can be crafted to collide with a different key layout. The
//! fingerprint is the first 16 bytes of the SHA-256 of that string, in hex.

use data_loader::QueryFilters;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Bumped whenever the canonical form changes, so old cache entries are never read
const CANONICAL_VERSION: &str = "v1";

/// Length of a fingerprint in hex characters
pub const FINGERPRINT_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cache key for the recommendation payload of this query
    pub fn cache_key(&self) -> String {
        format!("rec:{}", self.0)
    }

    /// First 8 characters, for log lines. Shorter values (e.g. read back
    /// from an old trace log) are returned whole.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical string that is hashed into the fingerprint
pub fn canonical_form(filters: &QueryFilters) -> String {
    let mut canonical = String::from(CANONICAL_VERSION);
    for (key, value) in filters.canonical_pairs() {
        canonical.push_str(&format!("|{key}={}:{value}", value.len()));
    }
    canonical
}

pub fn fingerprint(filters: &QueryFilters) -> Fingerprint {
    let digest = Sha256::digest(canonical_form(filters).as_bytes());
    Fingerprint(hex::encode(&digest[..FINGERPRINT_LEN / 2]))
}
