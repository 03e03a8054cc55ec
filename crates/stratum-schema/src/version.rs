use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A package version with a total order.
///
/// `1.2.3`, `1.2.3.4`, `1.2.3-beta.1`, `1.2.3+20240101` are all accepted.
/// Ordering compares the dotted numeric components first (missing trailing
/// components count as zero), then the pre-release suffix: a release orders
/// after any pre-release of the same numeric version, and two pre-releases
/// compare lexicographically. Build metadata after `+` never participates in
/// ordering.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    components: Vec<u64>,
    prerelease: Option<String>,
    build: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        if input.is_empty() {
            return Err(SchemaError::version(input, "empty version"));
        }

        let (body, build) = match input.split_once('+') {
            Some((b, meta)) => (b, Some(meta.to_owned())),
            None => (input, None),
        };

        let (numeric, prerelease) = match body.split_once('-') {
            Some((n, pre)) if !pre.is_empty() => (n, Some(pre.to_owned())),
            Some((_, _)) => {
                return Err(SchemaError::version(input, "empty pre-release suffix"));
            }
            None => (body, None),
        };

        let mut components = Vec::new();
        for part in numeric.split('.') {
            let n: u64 = part
                .parse()
                .map_err(|_| SchemaError::version(input, format!("non-numeric component '{part}'")))?;
            components.push(n);
        }

        Ok(Self {
            components,
            prerelease,
            build,
        })
    }

    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }
}

impl FromStr for Version {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nums: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", nums.join("."))?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse_and_display_roundtrip() {
        for s in ["1.0.0", "0.0.1", "1.2.3.4", "2.0.0-rc.1", "1.0.0+abc"] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("abc").is_err());
        assert!(Version::parse("1.x.0").is_err());
        assert!(Version::parse("1.0-").is_err());
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("1.0.0") < v("1.0.1"));
        assert!(v("1.9.0") < v("1.10.0"));
        assert!(v("2.0.0") > v("1.99.99"));
    }

    #[test]
    fn missing_components_compare_as_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0") < v("1.0.1"));
    }

    #[test]
    fn release_beats_prerelease() {
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0.0-rc.2") < v("1.0.0"));
    }

    #[test]
    fn prereleases_are_lexicographic() {
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-rc.1") < v("1.0.0-rc.2"));
    }

    #[test]
    fn build_metadata_is_ignored() {
        assert_eq!(v("1.0.0+build1"), v("1.0.0+build2"));
        assert_eq!(v("1.0.0+x"), v("1.0.0"));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&v("1.2.3-rc.1")).unwrap();
        assert_eq!(json, "\"1.2.3-rc.1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.2.3-rc.1"));
    }
}
