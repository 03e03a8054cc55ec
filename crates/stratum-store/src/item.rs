use serde::{Deserialize, Serialize};
use stratum_schema::{CommitId, PackageInfo, Reference};

/// The stored record for one `(reference, module)` pair (`item.json` next to
/// the layer payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerItem {
    pub info: PackageInfo,
    pub commit: CommitId,
    /// Minified-bundle identity this materialization belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subref: Option<String>,
    /// Set when a removal was deferred because the reference was in use.
    #[serde(default)]
    pub deleted: bool,
    pub created_at: String,
}

impl LayerItem {
    pub fn reference(&self) -> Result<Reference, stratum_schema::SchemaError> {
        self.info.reference()
    }
}

/// Filter for local layer enumeration. Every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct RepoQuery {
    pub id: Option<String>,
    pub channel: Option<String>,
    pub version: Option<String>,
    pub deleted: Option<bool>,
}

impl RepoQuery {
    pub fn deleted() -> Self {
        Self {
            deleted: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &LayerItem) -> bool {
        if let Some(id) = &self.id {
            if *id != item.info.id {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if *channel != item.info.channel {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if *version != item.info.version {
                return false;
            }
        }
        if let Some(deleted) = self.deleted {
            if deleted != item.deleted {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_schema::PackageKind;

    fn item(id: &str, version: &str, deleted: bool) -> LayerItem {
        LayerItem {
            info: PackageInfo {
                id: id.to_owned(),
                version: version.to_owned(),
                channel: "stable".to_owned(),
                arch: "x86_64".to_owned(),
                kind: PackageKind::App,
                module: "binary".to_owned(),
                base: Some("org.example.base/23.0.0".to_owned()),
                runtime: None,
                uuid: None,
                description: None,
            },
            commit: CommitId::new("commit-1"),
            subref: None,
            deleted,
            created_at: "2025-01-01T00:00:00Z".to_owned(),
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(RepoQuery::default().matches(&item("a", "1.0.0", false)));
        assert!(RepoQuery::default().matches(&item("b", "2.0.0", true)));
    }

    #[test]
    fn query_filters_by_field() {
        let q = RepoQuery {
            id: Some("a".to_owned()),
            ..RepoQuery::default()
        };
        assert!(q.matches(&item("a", "1.0.0", false)));
        assert!(!q.matches(&item("b", "1.0.0", false)));

        let q = RepoQuery {
            version: Some("1.0.0".to_owned()),
            ..RepoQuery::default()
        };
        assert!(q.matches(&item("a", "1.0.0", false)));
        assert!(!q.matches(&item("a", "1.1.0", false)));
    }

    #[test]
    fn deleted_query_selects_deferred_items() {
        let q = RepoQuery::deleted();
        assert!(q.matches(&item("a", "1.0.0", true)));
        assert!(!q.matches(&item("a", "1.0.0", false)));
    }

    #[test]
    fn item_serde_roundtrip() {
        let original = item("a", "1.0.0", true);
        let json = serde_json::to_string(&original).unwrap();
        let back: LayerItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
