//! Environment construction for the exec'd child: reserved `WHARFRAT_*`
//! names seeded first, then crate `env`, then local-setup `env`, then the
//! host environment filtered through a blacklist.

use std::collections::BTreeMap;

/// Host variables never imported verbatim — shell/session plumbing that
/// means something different inside the container.
static DEFAULT_BLACKLIST: phf::Set<&'static str> = phf::phf_set! {
    "HOSTNAME", "PATH", "SHELL", "HOST", "USER", "HOME",
    "PS0", "PS1", "PS2", "PS3", "PS4",
    "VTE_VERSION", "KDE_SESSION_VERSION", "KONSOLE_VERSION",
    "WINDOWID", "XDG_SESSION_ID", "XDG_SESSION_TYPE",
};

const RESERVED: &[&str] =
    &["WHARFRAT_ID", "WHARFRAT_NAME", "WHARFRAT_CRATE", "WHARFRAT_PROJECT", "WHARFRAT_PROJECT_DIR"];

pub struct ReservedEnv {
    pub id: String,
    pub name: String,
    pub krate: String,
    pub project: String,
    pub project_dir: String,
}

/// Builds the full env map for an exec, in the precedence order spec'd:
/// reserved names win outright (host/crate attempts to set them are logged
/// and dropped), then crate `env`, then local-setup `env`, then host env
/// minus the blacklist (adjusted by `env-whitelist`/`env-blacklist`).
#[must_use]
pub fn build_env(
    reserved: &ReservedEnv,
    crate_env: &BTreeMap<String, String>,
    local_env: &BTreeMap<String, String>,
    host_env: &BTreeMap<String, String>,
    whitelist: &[String],
    blacklist: &[String],
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert("WHARFRAT_ID".to_owned(), reserved.id.clone());
    out.insert("WHARFRAT_NAME".to_owned(), reserved.name.clone());
    out.insert("WHARFRAT_CRATE".to_owned(), reserved.krate.clone());
    out.insert("WHARFRAT_PROJECT".to_owned(), reserved.project.clone());
    out.insert("WHARFRAT_PROJECT_DIR".to_owned(), reserved.project_dir.clone());

    for (k, v) in crate_env.iter().chain(local_env.iter()) {
        insert_unreserved(&mut out, k, v);
    }

    for (k, v) in host_env {
        if whitelist.iter().any(|w| w == k) {
            insert_unreserved(&mut out, k, v);
            continue;
        }
        if blacklist.iter().any(|b| b == k) || DEFAULT_BLACKLIST.contains(k.as_str()) {
            continue;
        }
        insert_unreserved(&mut out, k, v);
    }

    out
}

fn insert_unreserved(out: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if RESERVED.contains(&key) {
        log::warn!("buildEnv: ignoring attempt to override reserved variable {key}");
        return;
    }
    out.insert(key.to_owned(), value.to_owned());
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn reserved() -> ReservedEnv {
        ReservedEnv {
            id: "wr_abc".into(),
            name: "dev".into(),
            krate: "dev".into(),
            project: "/proj".into(),
            project_dir: "/proj".into(),
        }
    }

    #[test]
    fn reserved_names_cannot_be_overridden_by_crate_env() {
        let mut crate_env = BTreeMap::new();
        crate_env.insert("WHARFRAT_ID".to_owned(), "hijacked".to_owned());
        let out = build_env(&reserved(), &crate_env, &BTreeMap::new(), &BTreeMap::new(), &[], &[]);
        assert_eq!(out.get("WHARFRAT_ID"), Some(&"wr_abc".to_owned()));
    }

    #[test]
    fn default_blacklist_drops_host_shell_state() {
        let mut host = BTreeMap::new();
        host.insert("PATH".to_owned(), "/usr/bin".to_owned());
        host.insert("EDITOR".to_owned(), "vim".to_owned());
        let out = build_env(&reserved(), &BTreeMap::new(), &BTreeMap::new(), &host, &[], &[]);
        assert!(!out.contains_key("PATH"));
        assert_eq!(out.get("EDITOR"), Some(&"vim".to_owned()));
    }

    #[test]
    fn whitelist_overrides_default_blacklist() {
        let mut host = BTreeMap::new();
        host.insert("HOME".to_owned(), "/home/alice".to_owned());
        let out =
            build_env(&reserved(), &BTreeMap::new(), &BTreeMap::new(), &host, &["HOME".to_owned()], &[]);
        assert_eq!(out.get("HOME"), Some(&"/home/alice".to_owned()));
    }

    #[test]
    fn crate_blacklist_adds_to_default() {
        let mut host = BTreeMap::new();
        host.insert("SECRET".to_owned(), "xyz".to_owned());
        let out =
            build_env(&reserved(), &BTreeMap::new(), &BTreeMap::new(), &host, &[], &["SECRET".to_owned()]);
        assert!(!out.contains_key("SECRET"));
    }

    #[test]
    fn every_reserved_name_appears_exactly_once() {
        let out = build_env(&reserved(), &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), &[], &[]);
        for name in RESERVED {
            assert_eq!(out.keys().filter(|k| k.as_str() == *name).count(), 1);
        }
    }
}
