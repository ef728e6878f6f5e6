//! Per-user local state: `config.toml` (docker engine URL override) and the
//! `auth.json` registry-credential cache that sits alongside it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::unknown_keys::report_unknown_keys;

const QUALIFIER: &str = "at";
const ORGANIZATION: &str = "wharfr";
const APPLICATION: &str = "wharfrat";

/// Directory holding `config.toml`, `auth.json`, and the venv state file —
/// `~/.config/wharfrat` on Linux via `directories`.
#[must_use]
pub fn config_dir() -> Utf8PathBuf {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
        .map(|dirs| Utf8PathBuf::from_path_buf(dirs.config_dir().to_owned()).expect("utf8 home path"))
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(rename = "docker-url", default)]
    pub docker_url: Option<String>,
    /// Scripts run for every crate's provisioning, in addition to the
    /// crate's own `setup-*` — the "local per-user config" pass in §4.3.
    #[serde(rename = "setup-prep", default)]
    pub setup_prep: Option<String>,
    #[serde(rename = "setup-pre", default)]
    pub setup_pre: Option<String>,
    #[serde(rename = "setup-post", default)]
    pub setup_post: Option<String>,
    #[serde(default)]
    pub tarballs: BTreeMap<String, String>,
}

impl LocalConfig {
    fn known_keys() -> &'static [&'static str] {
        &["docker-url", "setup-prep", "setup-pre", "setup-post", "tarballs"]
    }

    /// Loads `config.toml` from `dir`; a missing file is not an error — an
    /// empty config is returned, matching the original's `sync.Once`-memoised
    /// loader that tolerates an absent file.
    pub fn load(dir: &Utf8Path) -> Result<LocalConfig> {
        let path = dir.join("config.toml");
        let Ok(data) = std::fs::read_to_string(&path) else {
            return Ok(LocalConfig::default());
        };
        let value: toml::Value =
            toml::from_str(&data).with_context(|| format!("parsing {path}"))?;
        report_unknown_keys(&value, Self::known_keys(), &path.to_string());
        let config: LocalConfig = value.try_into().with_context(|| format!("parsing {path}"))?;
        Ok(config)
    }
}

/// One saved credential, base64(JSON(...)) per server address in `auth.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

#[derive(Debug, Clone, Default)]
pub struct AuthCache {
    path: Utf8PathBuf,
    entries: BTreeMap<String, String>,
}

impl AuthCache {
    pub fn load(dir: &Utf8Path) -> Result<AuthCache> {
        let path = dir.join("auth.json");
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).with_context(|| format!("parsing {path}"))?,
            Err(_) => BTreeMap::new(),
        };
        Ok(AuthCache { path, entries })
    }

    #[must_use]
    pub fn get(&self, server_address: &str) -> Option<Credential> {
        use base64::Engine as _;
        let encoded = self.entries.get(server_address)?;
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    pub fn set(&mut self, credential: Credential) -> Result<()> {
        use base64::Engine as _;
        let json = serde_json::to_vec(&credential)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        self.entries.insert(credential.server_address.clone(), encoded);
        self.save()
    }

    pub fn clear(&mut self, server_address: &str) -> Result<()> {
        self.entries.remove(server_address);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.entries)?;
        let mut file = atomic_write_file::AtomicWriteFile::options()
            .open(&self.path)
            .with_context(|| format!("opening {} for atomic write", self.path))?;
        use std::io::Write as _;
        file.write_all(data.as_bytes())?;
        file.commit().with_context(|| format!("committing {}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_local_config_loads_as_default() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        let config = LocalConfig::load(&dir).unwrap();
        assert!(config.docker_url.is_none());
    }

    #[test]
    fn auth_cache_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        let mut cache = AuthCache::load(&dir).unwrap();
        cache
            .set(Credential {
                username: "alice".into(),
                password: "hunter2".into(),
                server_address: "registry.example.com".into(),
            })
            .unwrap();

        let reloaded = AuthCache::load(&dir).unwrap();
        let cred = reloaded.get("registry.example.com").unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "hunter2");
    }

    #[test]
    fn clearing_an_entry_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        let mut cache = AuthCache::load(&dir).unwrap();
        cache
            .set(Credential { username: "a".into(), password: "b".into(), server_address: "s".into() })
            .unwrap();
        cache.clear("s").unwrap();
        assert!(AuthCache::load(&dir).unwrap().get("s").is_none());
    }
}
