//! Parses an exported shim script: a TOML document whose first line is a
//! `#!.../bin/wr-exec` shebang (itself a valid TOML comment, so the whole
//! file decodes as one document).

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ShimScript {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(rename = "crate", default)]
    pub krate: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "auto-clean", default)]
    pub auto_clean: bool,
    #[serde(default)]
    pub version: u8,
    #[serde(skip)]
    pub path: Utf8PathBuf,
    #[serde(skip)]
    pub args_defined: bool,
}

impl ShimScript {
    pub fn parse(path: &Utf8Path) -> Result<ShimScript> {
        let data = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let value: toml::Value = toml::from_str(&data).with_context(|| format!("parsing {path}"))?;
        let args_defined = value.get("args").is_some();
        let mut script: ShimScript = value.try_into().with_context(|| format!("parsing {path}"))?;
        script.path = path.to_owned();
        script.args_defined = args_defined;
        // version 0 predates the field's introduction; treat it as 1.
        if script.version == 0 {
            script.version = 1;
        }
        Ok(script)
    }
}
