//! Dotted numeric phase versions.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MigrationError;

const MAX_COMPONENTS: usize = 4;

/// A phase version: one to four dot-separated unsigned numbers.
///
/// Versions compare component-wise with missing components treated as zero,
/// so `1.2` and `1.2.0` are equal. They display exactly as written.
///
/// ```
/// use strata_migrations::PhaseVersion;
///
/// let a: PhaseVersion = "1.2".parse().unwrap();
/// let b: PhaseVersion = "1.2.0".parse().unwrap();
/// let c: PhaseVersion = "1.10".parse().unwrap();
/// assert_eq!(a, b);
/// assert!(a < c);
/// assert_eq!(c.to_string(), "1.10");
/// ```
#[derive(Debug, Clone)]
pub struct PhaseVersion {
    parts: [u64; MAX_COMPONENTS],
    text: String,
}

impl PhaseVersion {
    /// `0.0.0`, the version below every roadmap phase.
    pub fn zero() -> Self {
        Self {
            parts: [0; MAX_COMPONENTS],
            text: "0.0.0".to_string(),
        }
    }

    /// The numeric components, padded with zeros.
    pub const fn components(&self) -> [u64; MAX_COMPONENTS] {
        self.parts
    }

    /// The version as written, with dots replaced by underscores.
    pub fn underscored(&self) -> String {
        self.text.replace('.', "_")
    }
}

impl FromStr for PhaseVersion {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let invalid = || MigrationError::InvalidVersion(s.to_string());
        if text.is_empty() {
            return Err(invalid());
        }
        let mut parts = [0_u64; MAX_COMPONENTS];
        let mut count = 0;
        for piece in text.split('.') {
            if count == MAX_COMPONENTS || piece.is_empty() {
                return Err(invalid());
            }
            if !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            parts[count] = piece.parse().map_err(|_| invalid())?;
            count += 1;
        }
        Ok(Self {
            parts,
            text: text.to_string(),
        })
    }
}

impl fmt::Display for PhaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for PhaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for PhaseVersion {}

impl Hash for PhaseVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for PhaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PhaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl Serialize for PhaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for PhaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
