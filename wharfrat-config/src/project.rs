//! The parsed `.wrproject` file: one TOML table per crate plus an optional
//! default crate name.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::{crate_model::Crate, error::WrError, unknown_keys::report_unknown_keys};

const PROJECT_FILE: &str = ".wrproject";
const CRATE_FILE: &str = ".wrcrate";

#[derive(Debug, Clone, Deserialize)]
struct RawProject {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    crates: BTreeMap<String, Crate>,
}

/// A loaded, immutable `.wrproject` file. Loaded once per invocation.
#[derive(Debug, Clone)]
pub struct Project {
    path: Utf8PathBuf,
    default: Option<String>,
    crates: BTreeMap<String, Crate>,
}

impl Project {
    /// Directory the project file lives in — the root every relative path
    /// in a crate (tarball sources, `setup-prep` cwd) is resolved against.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        self.path.parent().unwrap_or(Utf8Path::new("/"))
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    #[must_use]
    pub fn default_crate_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn crate_named(&self, name: &str) -> Result<&Crate, WrError> {
        self.crates.get(name).ok_or_else(|| WrError::CrateNotFound(name.to_owned()))
    }

    /// Every crate name defined in this project, in file order — used by
    /// `env create` when the caller didn't pin an explicit crate list.
    pub fn crate_names(&self) -> impl Iterator<Item = &str> {
        self.crates.keys().map(String::as_str)
    }

    /// Walks upward from `start` looking for `.wrproject`, parses it, and
    /// reports (to the debug log, non-fatally) any TOML keys it didn't
    /// recognize.
    pub fn locate(start: &Utf8Path) -> Result<Project> {
        let path = find_upward(start, PROJECT_FILE)
            .ok_or_else(|| WrError::ConfigNotFound(start.to_string()))?;
        Self::parse_file(&path)
    }

    pub fn parse_file(path: &Utf8Path) -> Result<Project> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading project file {path}"))?;
        Self::parse_str(&data, path.to_owned())
    }

    pub fn parse_str(data: &str, path: Utf8PathBuf) -> Result<Project> {
        let value: toml::Value = toml::from_str(data)
            .map_err(|e| WrError::InvalidConfig(format!("{path}: {e}")))?;
        let raw: RawProject = value
            .clone()
            .try_into()
            .map_err(|e| WrError::InvalidConfig(format!("{path}: {e}")))?;

        report_unknown_keys(&value, RawProject::known_keys(), &path.to_string());
        for (name, crate_value) in value.get("crates").and_then(toml::Value::as_table).into_iter().flatten() {
            report_unknown_keys(crate_value, Crate::known_keys(), &format!("{path} [crates.{name}]"));
        }

        log::debug!("project file: {path}");
        Ok(Project { path, default: raw.default, crates: raw.crates })
    }
}

impl RawProject {
    fn known_keys() -> &'static [&'static str] {
        &["default", "crates"]
    }
}

/// Reads the first non-blank line of a `.wrcrate` file located by the same
/// upward walk as the project file, if any.
pub fn locate_crate_override(start: &Utf8Path) -> Option<String> {
    let path = find_upward(start, CRATE_FILE)?;
    let data = std::fs::read_to_string(path).ok()?;
    data.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_owned)
}

fn find_upward(start: &Utf8Path, filename: &str) -> Option<Utf8PathBuf> {
    let mut dir = Some(start.to_owned());
    while let Some(d) = dir {
        let candidate = d.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent().map(Utf8Path::to_owned);
    }
    None
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn locates_project_file_walking_upward() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::write(root.join(PROJECT_FILE), "default = \"dev\"\n[crates.dev]\nimage = \"rust:latest\"\n")
            .unwrap();
        let nested = root.join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let project = Project::locate(&nested).unwrap();
        assert_eq!(project.default_crate_name(), Some("dev"));
        assert_eq!(project.root(), root);
    }

    #[test]
    fn missing_project_file_is_config_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let err = Project::locate(root).unwrap_err();
        assert!(err.downcast_ref::<WrError>().is_some());
    }

    #[test_case("default = \"x\"\n[crates.x]\nimage = \"a\"\n" ; "minimal project")]
    #[test_case("default = \"x\"\n[crates.x]\nimage = \"a\"\nbogus-top-level = 1\n" ; "unknown top-level key")]
    fn parses_without_erroring(data: &str) {
        Project::parse_str(data, Utf8PathBuf::from("/tmp/.wrproject")).unwrap();
    }

    #[test]
    fn crate_lookup_reports_crate_not_found() {
        let project =
            Project::parse_str("[crates.dev]\nimage = \"a\"\n", Utf8PathBuf::from("/tmp/.wrproject")).unwrap();
        let err = project.crate_named("missing").unwrap_err();
        assert!(matches!(err, WrError::CrateNotFound(name) if name == "missing"));
    }
}
