use core::{fmt, str::FromStr};

use crate::{Error, Result};

/// Longest department code accepted by [`ScopeKey::new`].
pub const MAX_DEPT_CODE_LEN: usize = 16;

/// A two-digit calendar year (`00..=99`).
///
/// # Example
///
/// ```
/// use rollseq::Year2;
///
/// let year = Year2::from_year(2025);
/// assert_eq!(year.value(), 25);
/// assert_eq!(year.to_string(), "25");
/// assert_eq!(Year2::from_year(2105).to_string(), "05");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Year2(u8);

impl Year2 {
    /// Creates a two-digit year, rejecting values above 99.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] if `value > 99`.
    pub fn new(value: u8) -> Result<Self> {
        if value > 99 {
            return Err(Error::invalid_scope(format!(
                "year must be two digits, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Keeps the last two digits of a full calendar year.
    pub fn from_year(year: i32) -> Self {
        // rem_euclid(100) is always in 0..100
        Self(year.rem_euclid(100) as u8)
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Year2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Year2 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_scope(format!(
                "year must be two digits, got {s:?}"
            )));
        }
        s.parse::<u8>()
            .map_err(|e| Error::invalid_scope(e.to_string()))
            .and_then(Self::new)
    }
}

impl TryFrom<u8> for Year2 {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Year2> for u8 {
    fn from(year: Year2) -> Self {
        year.0
    }
}

/// The namespace a sequence number is unique within: department, semester
/// and two-digit year.
///
/// A `ScopeKey` can only be obtained through validation, so every store
/// operation can assume a non-empty department code and a positive semester.
///
/// # Example
///
/// ```
/// use rollseq::{ScopeKey, Year2};
///
/// let scope = ScopeKey::new("CS", 1, Year2::from_year(2025)).unwrap();
/// assert_eq!(scope.dept_code(), "CS");
/// assert_eq!(scope.to_string(), "CS-S1-25");
///
/// assert!(ScopeKey::new("", 1, Year2::from_year(2025)).is_err());
/// assert!(ScopeKey::new("CS", 0, Year2::from_year(2025)).is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScopeKey {
    dept_code: String,
    semester: u32,
    year2: Year2,
}

impl ScopeKey {
    /// Validates and builds a scope.
    ///
    /// The department code is trimmed and must then be 1 to
    /// [`MAX_DEPT_CODE_LEN`] ASCII alphanumeric characters. The semester must
    /// be in `1..=i32::MAX`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] when either component is rejected.
    pub fn new(dept_code: &str, semester: i64, year2: Year2) -> Result<Self> {
        let dept_code = dept_code.trim();
        if dept_code.is_empty() {
            return Err(Error::invalid_scope("department code is empty"));
        }
        if dept_code.len() > MAX_DEPT_CODE_LEN {
            return Err(Error::invalid_scope(format!(
                "department code {dept_code:?} is longer than {MAX_DEPT_CODE_LEN} characters"
            )));
        }
        if !dept_code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::invalid_scope(format!(
                "department code {dept_code:?} must be ASCII alphanumeric"
            )));
        }
        if semester < 1 || semester > i64::from(i32::MAX) {
            return Err(Error::invalid_scope(format!(
                "semester must be a positive integer, got {semester}"
            )));
        }

        Ok(Self {
            dept_code: dept_code.to_owned(),
            // bounded by i32::MAX above
            semester: semester as u32,
            year2,
        })
    }

    pub fn dept_code(&self) -> &str {
        &self.dept_code
    }

    pub const fn semester(&self) -> u32 {
        self.semester
    }

    pub const fn year2(&self) -> Year2 {
        self.year2
    }
}

/// Formats as the identifier prefix, e.g. `CS-S1-25`.
impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-S{}-{}", self.dept_code, self.semester, self.year2)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ScopeKey {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            dept_code: String,
            semester: i64,
            year2: Year2,
        }

        let raw = Raw::deserialize(deserializer)?;
        Self::new(&raw.dept_code, raw.semester, raw.year2).map_err(serde::de::Error::custom)
    }
}
