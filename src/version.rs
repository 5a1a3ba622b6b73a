use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ResolutionError;

/// A dotted numeric product version with an optional qualifier.
///
/// Accepted forms are `9.9`, `10.2.0.77647` and `10.3-SNAPSHOT`. Missing
/// trailing components compare as zero, so `9.9` and `9.9.0` are equal.
/// A qualified build sorts before the release with the same numbers.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    numbers: Vec<u32>,
    qualifier: Option<String>,
}

impl Version {
    /// Parses a version string.
    ///
    /// # Arguments
    /// * `raw` - The version text
    ///
    /// # Returns
    /// * `Result<Self, ResolutionError>` - The version or `InvalidVersion`
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let invalid = || ResolutionError::InvalidVersion(raw.to_string());
        let (numeric, qualifier) = match raw.split_once('-') {
            Some((numeric, qualifier)) if !qualifier.is_empty() => {
                (numeric, Some(qualifier.to_string()))
            }
            Some(_) => return Err(invalid()),
            None => (raw, None),
        };
        if numeric.is_empty() {
            return Err(invalid());
        }
        let numbers = numeric
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            numbers,
            qualifier,
        })
    }

    /// Builds `major.minor` without going through string parsing.
    pub fn create(major: u32, minor: u32) -> Self {
        Self {
            raw: format!("{}.{}", major, minor),
            numbers: vec![major, minor],
            qualifier: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn major(&self) -> u32 {
        self.component(0)
    }

    pub fn minor(&self) -> u32 {
        self.component(1)
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// True when this is not a qualified (snapshot, milestone...) build.
    pub fn is_release(&self) -> bool {
        self.qualifier.is_none()
    }

    pub fn is_at_least(&self, major: u32, minor: u32) -> bool {
        *self >= Self::create(major, minor)
    }

    /// True when `prefix` matches the leading components of this version.
    ///
    /// `9.9` is a prefix of `9.9.0.1` but not of `9.90`.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        prefix.numbers.len() <= self.numbers.len()
            && prefix
                .numbers
                .iter()
                .zip(self.numbers.iter())
                .all(|(a, b)| a == b)
    }

    fn component(&self, index: usize) -> u32 {
        self.numbers.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        for index in 0..len {
            match self.component(index).cmp(&other.component(index)) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        match (&self.qualifier, &other.qualifier) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
