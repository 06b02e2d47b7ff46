use core::{fmt, str::FromStr};

use crate::{Error, Result, ScopeKey, Year2};

/// A formatted roll number: `{dept}-S{semester}-{yy}-{seq:03}`.
///
/// The sequence is zero-padded to three digits and widens naturally past 999,
/// so identifiers are never truncated.
///
/// # Example
///
/// ```
/// use rollseq::{Identifier, ScopeKey, Year2};
///
/// let scope = ScopeKey::new("CS", 1, Year2::from_year(2025)).unwrap();
/// assert_eq!(Identifier::new(scope.clone(), 47).to_string(), "CS-S1-25-047");
/// assert_eq!(Identifier::new(scope, 1000).to_string(), "CS-S1-25-1000");
///
/// let parsed: Identifier = "EE-S3-24-012".parse().unwrap();
/// assert_eq!(parsed.sequence(), 12);
/// assert_eq!(parsed.scope().dept_code(), "EE");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    scope: ScopeKey,
    sequence: u64,
}

impl Identifier {
    pub const fn new(scope: ScopeKey, sequence: u64) -> Self {
        Self { scope, sequence }
    }

    pub const fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn into_parts(self) -> (ScopeKey, u64) {
        (self.scope, self.sequence)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.scope, self.sequence)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdentifier {
            input: s.to_owned(),
        };

        let mut parts = s.split('-');
        let (Some(dept), Some(semester), Some(year2), Some(seq), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(invalid());
        };

        let semester = semester
            .strip_prefix('S')
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let year2 = year2.parse::<Year2>().map_err(|_| invalid())?;
        if seq.len() < 3 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let sequence = seq.parse::<u64>().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }
        let scope = ScopeKey::new(dept, semester, year2).map_err(|_| invalid())?;

        // Reject inputs that only parse after normalization (e.g. surrounding
        // whitespace or extra leading zeros past the pad width).
        let id = Self::new(scope, sequence);
        if id.to_string() != s {
            return Err(invalid());
        }
        Ok(id)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
