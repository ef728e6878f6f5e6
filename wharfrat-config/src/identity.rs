//! Container identity: the deterministic name and label set derived from a
//! resolved crate.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use nutype::nutype;

const NAME_PREFIX: &str = "wr_";
const LABEL_PREFIX: &str = "rat.wharf.";

/// The engine-facing container name. Always `wr_` followed by 32 hex
/// digits; the newtype keeps a bare `String` from being passed where a
/// validated name is expected.
#[nutype(
    validate(predicate = |name: &str| name.starts_with(NAME_PREFIX) && name.len() == NAME_PREFIX.len() + 32),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, AsRef, Display)
)]
pub struct ContainerName(String);

/// `wr_` + hex(MD5(project-path ‖ crate-name ‖ branch ‖ username)). Pure
/// function of its four inputs — this is the lookup key inside the engine.
#[must_use]
pub fn container_name(project_path: &str, crate_name: &str, branch: &str, username: &str) -> ContainerName {
    let mut hasher = Md5::new();
    hasher.update(project_path.as_bytes());
    hasher.update(crate_name.as_bytes());
    hasher.update(branch.as_bytes());
    hasher.update(username.as_bytes());
    let raw = format!("{NAME_PREFIX}{}", hex::encode(hasher.finalize()));
    ContainerName::try_new(raw).expect("hex(MD5(..)) always produces a valid name")
}

/// Labels written on create and compared on every `EnsureRunning`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub project: String,
    pub krate: String,
    pub commit: String,
    pub config: String,
    pub branch: String,
    pub user: String,
}

impl Labels {
    #[must_use]
    pub fn as_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (format!("{LABEL_PREFIX}project"), self.project.clone()),
            (format!("{LABEL_PREFIX}crate"), self.krate.clone()),
            (format!("{LABEL_PREFIX}commit"), self.commit.clone()),
            (format!("{LABEL_PREFIX}config"), self.config.clone()),
            (format!("{LABEL_PREFIX}branch"), self.branch.clone()),
            (format!("{LABEL_PREFIX}user"), self.user.clone()),
        ])
    }

    /// The freshness check: does a container wearing `self` still match a
    /// freshly-resolved crate's fingerprint, this tool's build, and the
    /// image it was created from? `image_id_matches` is computed by the
    /// caller (§4.2) — comparing a live container's current image id
    /// against the crate's freshly resolved one requires asking the engine,
    /// which this crate has no access to.
    #[must_use]
    pub fn is_fresh(&self, current_fingerprint: &str, current_commit: &str, image_id_matches: bool) -> bool {
        self.config == current_fingerprint && self.commit == current_commit && image_id_matches
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn container_name_is_pure() {
        let a = container_name("/proj", "dev", "main", "alice");
        let b = container_name("/proj", "dev", "main", "alice");
        assert_eq!(a, b);
        assert!(a.as_ref().starts_with(NAME_PREFIX));
    }

    #[test]
    fn container_name_is_sensitive_to_every_input() {
        let base = container_name("/proj", "dev", "main", "alice");
        assert_ne!(base, container_name("/other", "dev", "main", "alice"));
        assert_ne!(base, container_name("/proj", "other", "main", "alice"));
        assert_ne!(base, container_name("/proj", "dev", "other", "alice"));
        assert_ne!(base, container_name("/proj", "dev", "main", "bob"));
    }

    #[test]
    fn freshness_requires_both_config_and_commit_to_match() {
        let labels = Labels {
            project: "/p".into(),
            krate: "dev".into(),
            commit: "abc".into(),
            config: "{}".into(),
            branch: "main".into(),
            user: "alice".into(),
        };
        assert!(labels.is_fresh("{}", "abc", true));
        assert!(!labels.is_fresh("{\"x\":1}", "abc", true));
        assert!(!labels.is_fresh("{}", "def", true));
        assert!(!labels.is_fresh("{}", "abc", false), "a drifted image id must also mark it stale");
    }
}
