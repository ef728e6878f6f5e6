//! Version-control branch lookup. A missing or unavailable VC is non-fatal:
//! callers get an empty branch instead of an error, mirroring the degraded
//! `VcUnavailable` handling described for crate resolution.

use camino::Utf8Path;

/// Current branch for `dir`, or `""` if there's no VCS (or it errors out).
/// Shells out to `git`, the only VCS the original tool's collaborators
/// cover.
#[must_use]
pub fn current_branch(dir: &Utf8Path) -> String {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(dir)
        .output();

    match output {
        Ok(out) if out.status.success() => {
            String::from_utf8_lossy(&out.stdout).trim().to_owned()
        }
        Ok(out) => {
            log::debug!(
                "vc: git rev-parse failed in {dir}: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
            String::new()
        }
        Err(e) => {
            log::debug!("vc: git unavailable in {dir}: {e}");
            String::new()
        }
    }
}

/// Fetches the project TOML as it exists at `branch` rather than the
/// working tree, for `OpenVcCrate`. Returns `None` if the branch or path
/// can't be resolved through git.
#[must_use]
pub fn read_file_at_branch(dir: &Utf8Path, branch: &str, relative_path: &str) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["show", &format!("{branch}:{relative_path}")])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}
