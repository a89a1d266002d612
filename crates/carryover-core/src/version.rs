//! Dotted version strings with a total order.
//!
//! `11.0.10` < `11.0.10.1` < `11.1rc1` < `11.1` < `12`. Missing trailing
//! segments count as zero, so `11.0` == `11.0.0`. A segment may carry a
//! pre-release label (`rc1`, `beta`, `-pre2`) which sorts before the bare
//! release of the same number.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VersionError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Segment {
    number: u64,
    /// Pre-release label and its trailing counter, e.g. `("rc", 1)`.
    pre: Option<(String, u64)>,
}

impl Segment {
    fn parse(raw: &str, version: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidSegment {
            version: version.to_string(),
            segment: raw.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid());
        }

        let digits_end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
        let (digits, tail) = raw.split_at(digits_end);
        let number = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };

        let tail = tail.trim_start_matches(['-', '+']);
        if tail.is_empty() {
            return Ok(Self { number, pre: None });
        }
        if !tail.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        let label_end = tail
            .rfind(|c: char| !c.is_ascii_digit())
            .map_or(0, |i| i + 1);
        let (label, counter) = tail.split_at(label_end);
        let counter = if counter.is_empty() {
            0
        } else {
            counter.parse().map_err(|_| invalid())?
        };

        Ok(Self {
            number,
            pre: Some((label.to_ascii_lowercase(), counter)),
        })
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed version, comparable with `<`, `<=`, `==`.
#[derive(Debug, Clone)]
pub struct VersionTag {
    raw: String,
    segments: Vec<Segment>,
}

impl VersionTag {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        let segments = trimmed
            .split('.')
            .map(|s| Segment::parse(s, trimmed))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// The string this tag was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for VersionTag {
    fn cmp(&self, other: &Self) -> Ordering {
        let zero = Segment::default();
        let len = self.segments.len().max(other.segments.len());
        (0..len)
            .map(|i| {
                let a = self.segments.get(i).unwrap_or(&zero);
                let b = other.segments.get(i).unwrap_or(&zero);
                a.cmp(b)
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for VersionTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionTag {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for VersionTag {}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionTag {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionTag {
        VersionTag::parse(s).expect("valid version")
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("11.0.9") < v("11.0.10"));
        assert!(v("11.0.10") < v("11.1"));
        assert!(v("2") < v("10"));
        assert!(v("11.0.10") <= v("11.0.10"));
    }

    #[test]
    fn trailing_zeros_are_equal() {
        assert_eq!(v("11.0"), v("11.0.0"));
        assert_eq!(v("11"), v("11.0.0.0"));
        assert!(v("11.0") < v("11.0.0.1"));
    }

    #[test]
    fn pre_release_sorts_before_release() {
        assert!(v("11.1rc1") < v("11.1"));
        assert!(v("11.1rc1") < v("11.1rc2"));
        assert!(v("11.1a9") < v("11.1b1"));
        assert!(v("11.0.10") < v("11.1rc1"));
        assert!(v("1.2-beta") < v("1.2"));
    }

    #[test]
    fn pre_release_counter_is_numeric() {
        assert!(v("5.0rc2") < v("5.0rc10"));
    }

    #[test]
    fn display_keeps_raw_text() {
        assert_eq!(v(" 11.0.10rc1 ").to_string(), "11.0.10rc1");
    }

    #[test]
    fn rejects_empty_and_malformed() {
        assert_eq!(VersionTag::parse("   "), Err(VersionError::Empty));
        assert!(matches!(
            VersionTag::parse("1..2"),
            Err(VersionError::InvalidSegment { .. })
        ));
        assert!(matches!(
            VersionTag::parse("1.2_x"),
            Err(VersionError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn serde_as_string() {
        let tag = v("11.0.10");
        let json = serde_json::to_string(&tag).expect("serialize");
        assert_eq!(json, r#""11.0.10""#);
        let back: VersionTag = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, tag);
        assert!(serde_json::from_str::<VersionTag>(r#""""#).is_err());
    }
}
