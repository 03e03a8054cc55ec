use crate::arch::Architecture;
use crate::version::Version;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully-qualified package identity: `channel:id/version/arch`.
///
/// All four components are required. Two references are equal iff their
/// canonical strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub channel: String,
    pub id: String,
    pub version: Version,
    pub arch: Architecture,
}

impl Reference {
    pub fn new(
        channel: impl Into<String>,
        id: impl Into<String>,
        version: Version,
        arch: Architecture,
    ) -> Self {
        Self {
            channel: channel.into(),
            id: id.into(),
            version,
            arch,
        }
    }

    /// Parse the canonical form `channel:id/version/arch`.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let (channel, rest) = input
            .split_once(':')
            .ok_or_else(|| SchemaError::reference(input, "missing channel"))?;
        if channel.is_empty() {
            return Err(SchemaError::reference(input, "empty channel"));
        }

        let mut parts = rest.split('/');
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SchemaError::reference(input, "missing id"))?;
        let version = parts
            .next()
            .ok_or_else(|| SchemaError::reference(input, "missing version"))?;
        let arch = parts
            .next()
            .ok_or_else(|| SchemaError::reference(input, "missing architecture"))?;
        if parts.next().is_some() {
            return Err(SchemaError::reference(input, "trailing components"));
        }

        Ok(Self {
            channel: channel.to_owned(),
            id: id.to_owned(),
            version: Version::parse(version)?,
            arch: Architecture::parse(arch)?,
        })
    }

    /// The version-less fuzzy form of this reference, used to look up the
    /// newest local sibling of the same package.
    pub fn fuzzy_without_version(&self) -> FuzzyReference {
        FuzzyReference {
            channel: Some(self.channel.clone()),
            id: self.id.clone(),
            version: None,
            arch: Some(self.arch),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.channel, self.id, self.version, self.arch
        )
    }
}

/// A partially-specified identity used during resolution. Only `id` is
/// required.
///
/// Accepted textual forms: `id`, `id/version`, `id/version/arch`,
/// `channel:id`, `channel:id/version`, `channel:id/version/arch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyReference {
    pub channel: Option<String>,
    pub id: String,
    pub version: Option<Version>,
    pub arch: Option<Architecture>,
}

impl FuzzyReference {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            channel: None,
            id: id.into(),
            version: None,
            arch: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let (channel, rest) = match input.split_once(':') {
            Some((c, r)) => {
                if c.is_empty() {
                    return Err(SchemaError::reference(input, "empty channel"));
                }
                (Some(c.to_owned()), r)
            }
            None => (None, input),
        };

        let mut parts = rest.split('/');
        let id = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SchemaError::reference(input, "missing id"))?;
        let version = parts.next().map(Version::parse).transpose()?;
        let arch = parts.next().map(Architecture::parse).transpose()?;
        if parts.next().is_some() {
            return Err(SchemaError::reference(input, "trailing components"));
        }

        Ok(Self {
            channel,
            id: id.to_owned(),
            version,
            arch,
        })
    }

    /// Whether a fully-qualified reference satisfies every component this
    /// fuzzy reference pins down.
    pub fn matches(&self, reference: &Reference) -> bool {
        if self.id != reference.id {
            return false;
        }
        if let Some(channel) = &self.channel {
            if *channel != reference.channel {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if *version != reference.version {
                return false;
            }
        }
        if let Some(arch) = &self.arch {
            if *arch != reference.arch {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for FuzzyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}:")?;
        }
        write!(f, "{}", self.id)?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        if let Some(arch) = &self.arch {
            write!(f, "/{arch}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_parse_roundtrip() {
        let input = "stable:org.example.calc/1.0.0/x86_64";
        let reference = Reference::parse(input).unwrap();
        assert_eq!(reference.channel, "stable");
        assert_eq!(reference.id, "org.example.calc");
        assert_eq!(reference.version, Version::parse("1.0.0").unwrap());
        assert_eq!(reference.arch, Architecture::X86_64);
        assert_eq!(reference.to_string(), input);
    }

    #[test]
    fn reference_requires_all_parts() {
        assert!(Reference::parse("org.example.calc").is_err());
        assert!(Reference::parse("stable:org.example.calc").is_err());
        assert!(Reference::parse("stable:org.example.calc/1.0.0").is_err());
        assert!(Reference::parse(":org.example.calc/1.0.0/x86_64").is_err());
        assert!(Reference::parse("stable:/1.0.0/x86_64").is_err());
        assert!(Reference::parse("stable:a/1.0.0/x86_64/extra").is_err());
    }

    #[test]
    fn fuzzy_parse_forms() {
        let f = FuzzyReference::parse("org.example.calc").unwrap();
        assert_eq!(f.id, "org.example.calc");
        assert!(f.channel.is_none() && f.version.is_none() && f.arch.is_none());

        let f = FuzzyReference::parse("org.example.calc/1.2.0").unwrap();
        assert_eq!(f.version, Some(Version::parse("1.2.0").unwrap()));

        let f = FuzzyReference::parse("stable:org.example.calc/1.2.0/x86_64").unwrap();
        assert_eq!(f.channel.as_deref(), Some("stable"));
        assert_eq!(f.arch, Some(Architecture::X86_64));
    }

    #[test]
    fn fuzzy_rejects_malformed() {
        assert!(FuzzyReference::parse("").is_err());
        assert!(FuzzyReference::parse(":id").is_err());
        assert!(FuzzyReference::parse("id/1.0/x86_64/extra").is_err());
        assert!(FuzzyReference::parse("id/notaversion").is_err());
    }

    #[test]
    fn fuzzy_matches_pinned_components() {
        let reference = Reference::parse("stable:app/1.0.0/x86_64").unwrap();
        assert!(FuzzyReference::parse("app").unwrap().matches(&reference));
        assert!(FuzzyReference::parse("stable:app").unwrap().matches(&reference));
        assert!(FuzzyReference::parse("app/1.0.0").unwrap().matches(&reference));
        assert!(!FuzzyReference::parse("other").unwrap().matches(&reference));
        assert!(!FuzzyReference::parse("beta:app").unwrap().matches(&reference));
        assert!(!FuzzyReference::parse("app/2.0.0").unwrap().matches(&reference));
    }

    #[test]
    fn fuzzy_display_roundtrip() {
        for s in ["app", "app/1.0.0", "stable:app", "stable:app/1.0.0/x86_64"] {
            assert_eq!(FuzzyReference::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn fuzzy_without_version_keeps_channel_and_arch() {
        let reference = Reference::parse("stable:app/1.0.0/x86_64").unwrap();
        let fuzzy = reference.fuzzy_without_version();
        assert_eq!(fuzzy.channel.as_deref(), Some("stable"));
        assert_eq!(fuzzy.arch, Some(Architecture::X86_64));
        assert!(fuzzy.version.is_none());
    }
}
