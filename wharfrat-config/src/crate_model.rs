//! The `[crates.NAME]` sub-table of a project file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One named environment profile. All fields but `image` are optional; the
/// defaults actually applied at exec time (hostname, shell, …) are filled in
/// by [`crate::resolve::GetCrate`], not here, so that an unset field and an
/// explicit default remain distinguishable to the freshness/fingerprint
/// check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crate {
    pub image: String,
    #[serde(rename = "image-cmd", default)]
    pub image_cmd: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(rename = "working-dir", default)]
    pub working_dir: Option<String>,

    #[serde(rename = "mount-home", default = "default_true")]
    pub mount_home: bool,
    #[serde(rename = "project-mount", default)]
    pub project_mount: Option<String>,
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    #[serde(default)]
    pub tmpfs: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub network: Option<String>,

    #[serde(rename = "cap-add", default)]
    pub cap_add: Vec<String>,
    #[serde(rename = "cap-drop", default)]
    pub cap_drop: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(rename = "copy-groups", default)]
    pub copy_groups: Vec<String>,
    #[serde(rename = "path-append", default)]
    pub path_append: Vec<String>,
    #[serde(rename = "path-prepend", default)]
    pub path_prepend: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "env-whitelist", default)]
    pub env_whitelist: Vec<String>,
    #[serde(rename = "env-blacklist", default)]
    pub env_blacklist: Vec<String>,

    #[serde(rename = "setup-prep", default)]
    pub setup_prep: Option<String>,
    #[serde(rename = "setup-pre", default)]
    pub setup_pre: Option<String>,
    #[serde(rename = "setup-post", default)]
    pub setup_post: Option<String>,
    #[serde(default)]
    pub tarballs: BTreeMap<String, String>,

    #[serde(rename = "export-bin", default)]
    pub export_bin: Vec<String>,

    #[serde(rename = "cmd-replace", default)]
    pub cmd_replace: BTreeMap<String, String>,
}

impl Crate {
    pub(crate) fn known_keys() -> &'static [&'static str] {
        &[
            "image",
            "image-cmd",
            "hostname",
            "shell",
            "working-dir",
            "mount-home",
            "project-mount",
            "volumes",
            "tmpfs",
            "ports",
            "network",
            "cap-add",
            "cap-drop",
            "groups",
            "copy-groups",
            "path-append",
            "path-prepend",
            "env",
            "env-whitelist",
            "env-blacklist",
            "setup-prep",
            "setup-pre",
            "setup-post",
            "tarballs",
            "export-bin",
            "cmd-replace",
        ]
    }

    /// Canonical JSON of this crate — `serde_json` with `preserve_order`
    /// disabled for map fields (`BTreeMap` sorts keys already) gives a
    /// stable byte-for-byte representation regardless of the order the
    /// TOML table's keys were written in.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).expect("Crate serializes")
    }

    /// Rewrites `command[0]` through `cmd-replace` if it names a match;
    /// the replacement is split as shell words so it can expand into more
    /// than one argv entry (e.g. `"python" = "python3 -u"`). No match
    /// leaves `command` untouched.
    #[must_use]
    pub fn apply_cmd_replace(&self, mut command: Vec<String>) -> Vec<String> {
        let Some(first) = command.first() else { return command };
        let Some(replacement) = self.cmd_replace.get(first) else { return command };
        let mut replaced = shell_words::split(replacement).unwrap_or_else(|_| vec![replacement.clone()]);
        replaced.extend(command.drain(1..));
        replaced
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn minimal(image: &str) -> Crate {
        toml::from_str(&format!("image = \"{image}\"\n")).unwrap()
    }

    #[test]
    fn mount_home_defaults_true_when_key_absent() {
        assert!(minimal("rust:latest").mount_home);
    }

    #[test]
    fn mount_home_false_is_respected() {
        let c: Crate = toml::from_str("image = \"x\"\nmount-home = false\n").unwrap();
        assert!(!c.mount_home);
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_source_key_order() {
        let a: Crate = toml::from_str("image = \"x\"\nhostname = \"h\"\n[env]\nA = \"1\"\nB = \"2\"\n").unwrap();
        let b: Crate = toml::from_str("hostname = \"h\"\nimage = \"x\"\n[env]\nB = \"2\"\nA = \"1\"\n").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        assert_ne!(minimal("a").fingerprint(), minimal("b").fingerprint());
    }

    #[test]
    fn cmd_replace_rewrites_matching_command_name() {
        let c: Crate = toml::from_str("image = \"x\"\n[cmd-replace]\npython = \"python3 -u\"\n").unwrap();
        assert_eq!(
            c.apply_cmd_replace(vec!["python".to_owned(), "script.py".to_owned()]),
            vec!["python3".to_owned(), "-u".to_owned(), "script.py".to_owned()],
        );
    }

    #[test]
    fn cmd_replace_leaves_unmatched_command_untouched() {
        let c: Crate = toml::from_str("image = \"x\"\n[cmd-replace]\npython = \"python3\"\n").unwrap();
        assert_eq!(c.apply_cmd_replace(vec!["bash".to_owned()]), vec!["bash".to_owned()]);
    }
}
