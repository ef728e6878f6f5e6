//! `.state.json`: the record of every binary this environment has exported
//! from each of its crates, used to detect what's new (export the delta)
//! and to replay exported commands after a container is recreated.

use std::collections::BTreeMap;
use std::io::Write as _;

use anyhow::{bail, Context as _, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use wharfrat_config::{Crate, ResolvedCrate};
use wharfrat_docker::{Client, ExecRequest};

const STATE_FILE: &str = ".state.json";
const ENV_VAR: &str = "WHARFRAT_ENV";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binary {
    pub command: Vec<String>,
    pub paths: Vec<String>,
    pub user: String,
    pub workdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub project: String,
    pub crates: Vec<String>,
    pub binaries: BTreeMap<String, Vec<Binary>>,
    #[serde(rename = "envpath")]
    pub env_path: String,
}

impl State {
    /// `None` when `WHARFRAT_ENV` is unset (environment feature not active)
    /// or the state file doesn't exist yet.
    pub fn load() -> Result<Option<State>> {
        let Ok(env_path) = std::env::var(ENV_VAR) else { return Ok(None) };
        if env_path.is_empty() {
            return Ok(None);
        }
        let path = Utf8Path::new(&env_path).join(STATE_FILE);
        let Ok(data) = std::fs::read_to_string(&path) else { return Ok(None) };
        let state: State = serde_json::from_str(&data).with_context(|| format!("parsing {path}"))?;
        if state.env_path != env_path {
            bail!("environment may have been moved?");
        }
        Ok(Some(state))
    }

    pub fn new(env_path: String, project: String, crates: Vec<String>) -> State {
        State { project, crates, binaries: BTreeMap::new(), env_path }
    }

    pub fn save(&self) -> Result<()> {
        let path = Utf8Path::new(&self.env_path).join(STATE_FILE);
        let data = serde_json::to_string_pretty(self).context("serializing environment state")?;
        let mut file = std::fs::File::create(&path).with_context(|| format!("creating {path}"))?;
        file.write_all(data.as_bytes()).with_context(|| format!("writing {path}"))
    }

    #[must_use]
    pub fn matches_crate(&self, resolved: &ResolvedCrate) -> bool {
        self.project == resolved.project_root.as_str() && self.crates.iter().any(|c| c == &resolved.name)
    }

    fn get_delta(&self, crate_name: &str, paths: &[String]) -> Vec<String> {
        let known: std::collections::HashSet<&str> = self
            .binaries
            .get(crate_name)
            .into_iter()
            .flatten()
            .flat_map(|b| b.paths.iter().map(String::as_str))
            .collect();
        let delta: Vec<String> = paths.iter().filter(|p| !known.contains(p.as_str())).cloned().collect();
        log::debug!("venv delta for {crate_name}: {paths:?} -> {delta:?}");
        delta
    }

    fn create_binary(&self, crate_name: &str, path: &str) -> Result<()> {
        let name = Utf8Path::new(path).file_name().unwrap_or(path);
        let ref_path = Utf8Path::new(&self.env_path).join("bin").join(name);
        let body = format!(
            "#!{}/bin/wr-exec\n\nproject = \"{}\"\ncrate = \"{crate_name}\"\ncommand = [\"{path}\"]\nauto-clean = true\n",
            self.env_path, self.project,
        );
        std::fs::write(&ref_path, body).with_context(|| format!("writing shim {ref_path}"))?;
        set_executable(&ref_path)?;
        Ok(())
    }

    fn export_binaries(&mut self, crate_name: &str, cmd: Vec<String>, user: String, workdir: String, paths: Vec<String>) -> Result<()> {
        log::debug!("venv export: {cmd:?} {paths:?}");
        for path in &paths {
            self.create_binary(crate_name, path)?;
        }
        self.binaries.entry(crate_name.to_owned()).or_default().push(Binary { command: cmd, paths, user, workdir });
        Ok(())
    }

    /// Searches the container for binaries matching `crate.export-bin`,
    /// exporting any that weren't already known.
    pub async fn update(
        &mut self,
        client: &Client,
        container_id: &str,
        crate_name: &str,
        export_bin: &[String],
        user: &str,
        workdir: &str,
        cmd: Option<&[String]>,
    ) -> Result<()> {
        let paths = find_binaries(client, container_id, export_bin, user).await?;
        let delta = self.get_delta(crate_name, &paths);
        if delta.is_empty() {
            return Ok(());
        }
        self.export_binaries(crate_name, cmd.map(<[String]>::to_vec).unwrap_or_default(), user.to_owned(), workdir.to_owned(), delta)
    }

    /// Replays every binary's recorded command to rediscover its exported
    /// paths after a container recreate — called from the after-create hook.
    pub async fn rebuild(&mut self, client: &Client, container_id: &str, crate_config: &Crate, crate_name: &str) -> Result<()> {
        let Some(binaries) = self.binaries.remove(crate_name) else { return Ok(()) };
        self.update(client, container_id, crate_name, &crate_config.export_bin, "", "", None).await?;

        for binary in binaries {
            if binary.command.is_empty() {
                continue;
            }
            let delta = self.get_delta(crate_name, &binary.paths);
            if delta.is_empty() {
                continue;
            }
            log::debug!("venv restore: {:?} {delta:?}", binary.command);
            let outcome = wharfrat_docker::exec_cmd(
                client,
                ExecRequest {
                    container_id,
                    argv: binary.command.clone(),
                    user: (!binary.user.is_empty()).then_some(binary.user.as_str()),
                    env: Default::default(),
                    workdir: (!binary.workdir.is_empty()).then(|| binary.workdir.clone()),
                    tty: false,
                    extra_fds: &[],
                    version: 2,
                },
            )
            .await
            .with_context(|| format!("replaying exported command {:?}", binary.command))?;
            if outcome.exit_code != 0 {
                bail!("replaying exported command {:?} failed", binary.command);
            }
            self.update(client, container_id, crate_name, &crate_config.export_bin, &binary.user, &binary.workdir, Some(&binary.command)).await?;
        }
        Ok(())
    }

    /// Looks up an external `wharfrat` on `PATH`, ignoring this
    /// environment's own `bin` directory.
    pub fn find_external_wharfrat(&self) -> Option<String> {
        let bin_dir = Utf8Path::new(&self.env_path).join("bin");
        look_path("wharfrat", bin_dir.as_str())
    }
}

async fn find_binaries(client: &Client, container_id: &str, patterns: &[String], user: &str) -> Result<Vec<String>> {
    let mut argv = vec!["/sbin/wr-init".to_owned(), "search".to_owned(), "-x".to_owned()];
    argv.extend(patterns.iter().cloned());
    let user = (!user.is_empty()).then_some(user);
    let stdout = wharfrat_docker::get_output(client, container_id, &argv, user).await?;
    Ok(String::from_utf8_lossy(&stdout).lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_owned).collect())
}

fn set_executable(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).with_context(|| format!("chmod {path}"))
}

/// `exec.LookPath`, except `ignore` is skipped when walking `PATH`.
fn look_path(file: &str, ignore: &str) -> Option<String> {
    if file.contains('/') {
        return is_executable(Utf8Path::new(file)).then(|| file.to_owned());
    }
    let path = std::env::var("PATH").ok()?;
    for dir in path.split(':') {
        if dir == ignore {
            continue;
        }
        let dir = if dir.is_empty() { "." } else { dir };
        let candidate = Utf8Path::new(dir).join(file);
        if is_executable(&candidate) {
            return Some(candidate.into_string());
        }
    }
    None
}

fn is_executable(path: &Utf8Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}
