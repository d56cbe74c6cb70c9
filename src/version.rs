//! Schema versions
//!
//! A [`Version`] is the `MAJOR.MINOR.PATCH` triple recorded both in the
//! `db.version` descriptor file (the desired state) and in the database
//! (the last applied state). Identity and ordering only consider the three
//! numeric segments; the database id and timestamps ride along as metadata.

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A three-part schema version
///
/// `Version::default()` is `0.0.0`, the version of a database that has never
/// been migrated.
///
/// # Examples
///
/// ```
/// use schemaguard::Version;
///
/// let current: Version = "1.2.0".parse().unwrap();
/// let target = Version::parse("1.10.0").unwrap();
///
/// assert!(target.greater_than(&current));
/// assert_eq!(target.to_string(), "1.10.0");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Row id of the version record, when read from the database
    pub id: Option<i32>,
    /// When the migration that produced this version started
    pub started_at: Option<NaiveDateTime>,
    /// When the migration that produced this version finished
    pub finished_at: Option<NaiveDateTime>,
}

/// Why a version string was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    /// The input did not have exactly three `.`-separated segments
    SegmentCount { input: String, found: usize },
    /// A segment was empty, signed, non-numeric, or out of range
    InvalidSegment { input: String, segment: String },
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionParseError::SegmentCount { input, found } => write!(
                f,
                "Invalid MAJOR.MINOR.PATCH semver: '{input}' (expected 3 segments, found {found})"
            ),
            VersionParseError::InvalidSegment { input, segment } => write!(
                f,
                "Invalid MAJOR.MINOR.PATCH semver: '{input}' (segment '{segment}' is not an integer between 0 and {MAX_SEGMENT})"
            ),
        }
    }
}

impl std::error::Error for VersionParseError {}

impl Version {
    /// Create a version from its numeric segments
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            ..Self::default()
        }
    }

    /// Parse a canonical `MAJOR.MINOR.PATCH` string
    ///
    /// Surrounding whitespace is ignored so the contents of a descriptor file
    /// can be passed as-is. Every segment must be a plain run of ASCII digits
    /// no larger than [`MAX_SEGMENT`], the range of the database's `integer`
    /// columns; nothing is ever defaulted to zero.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] if the segment count is not three or any
    /// segment is empty, signed, non-numeric, or overflows.
    pub fn parse(text: &str) -> Result<Self, VersionParseError> {
        let input = text.trim();
        let segments: Vec<&str> = input.split('.').collect();
        if segments.len() != 3 {
            return Err(VersionParseError::SegmentCount {
                input: input.to_string(),
                found: segments.len(),
            });
        }

        let mut parsed = [0u32; 3];
        for (slot, segment) in parsed.iter_mut().zip(&segments) {
            *slot = parse_segment(segment).ok_or_else(|| VersionParseError::InvalidSegment {
                input: input.to_string(),
                segment: (*segment).to_string(),
            })?;
        }

        Ok(Self::new(parsed[0], parsed[1], parsed[2]))
    }

    /// Compare major, then minor, then patch
    ///
    /// Returns `-1`, `0` or `1`; the first unequal segment decides.
    #[must_use]
    pub fn compare(&self, other: &Version) -> i8 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    #[must_use]
    pub fn greater_than(&self, other: &Version) -> bool {
        self.compare(other) > 0
    }

    #[must_use]
    pub fn greater_than_or_eq(&self, other: &Version) -> bool {
        self.compare(other) >= 0
    }

    #[must_use]
    pub fn less_than_or_eq(&self, other: &Version) -> bool {
        self.compare(other) <= 0
    }

    /// `true` for `0.0.0`
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0
    }

    fn segments(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

/// Largest segment a version may carry; the recorded version is stored as `integer`
pub const MAX_SEGMENT: u32 = i32::MAX as u32;

fn parse_segment(segment: &str) -> Option<u32> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse::<u32>().ok().filter(|value| *value <= MAX_SEGMENT)
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments() == other.segments()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(&other.segments())
    }
}
