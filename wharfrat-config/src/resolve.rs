//! `GetCrate`/`OpenVcCrate`: turning a starting directory (plus an optional
//! explicit crate name) into a fully-defaulted [`ResolvedCrate`].

use camino::{Utf8Path, Utf8PathBuf};

use crate::{
    crate_model::Crate,
    error::WrError,
    project::{locate_crate_override, Project},
    script::run_host_script,
    vc,
};

/// A crate with every back-reference and default filled in: which project
/// it came from, its name, the VC branch active when it was resolved. Kept
/// separate from `Crate` itself (the REDESIGN FLAG's arena approach) rather
/// than a crate-owns-a-project-reference cycle.
#[derive(Debug, Clone)]
pub struct ResolvedCrate {
    pub config: Crate,
    pub name: String,
    pub branch: String,
    pub project_root: Utf8PathBuf,
}

/// Locates `.wrproject` above `start_dir`, picks a crate (explicit override,
/// else `.wrcrate`, else the project default, else `"default"`), runs
/// `image-cmd` if set, and applies field defaults.
pub fn get_crate(start_dir: &Utf8Path, name_override: Option<&str>) -> anyhow::Result<ResolvedCrate> {
    let project = Project::locate(start_dir)?;
    let name = select_crate_name(&project, start_dir, name_override);
    let branch = vc::current_branch(project.root());

    let mut config = project.crate_named(&name)?.clone();
    resolve_image_cmd(&mut config, project.root())?;
    apply_defaults(&mut config);

    Ok(ResolvedCrate { config, name, branch, project_root: project.root().to_owned() })
}

/// Same resolution, but the project TOML is read from the VCS at `branch`
/// rather than the working tree.
pub fn open_vc_crate(
    project_path: &Utf8Path,
    branch: &str,
    name: &str,
) -> anyhow::Result<ResolvedCrate> {
    let project_dir = project_path.parent().unwrap_or(Utf8Path::new("/"));
    let relative = project_path
        .file_name()
        .ok_or_else(|| WrError::InvalidConfig(format!("{project_path}: not a file path")))?;
    let data = vc::read_file_at_branch(project_dir, branch, relative)
        .ok_or_else(|| WrError::VcUnavailable(format!("{project_path}@{branch}")))?;

    let project = Project::parse_str(&data, project_path.to_owned())?;
    let mut config = project.crate_named(name)?.clone();
    resolve_image_cmd(&mut config, project_dir)?;
    apply_defaults(&mut config);

    Ok(ResolvedCrate { config, name: name.to_owned(), branch: branch.to_owned(), project_root: project_dir.to_owned() })
}

fn select_crate_name(project: &Project, start_dir: &Utf8Path, name_override: Option<&str>) -> String {
    if let Some(name) = name_override.filter(|n| !n.is_empty()) {
        return name.to_owned();
    }
    if let Some(name) = locate_crate_override(start_dir) {
        return name;
    }
    project.default_crate_name().unwrap_or("default").to_owned()
}

fn resolve_image_cmd(config: &mut Crate, project_dir: &Utf8Path) -> anyhow::Result<()> {
    let Some(script) = config.image_cmd.clone() else { return Ok(()) };
    let mut env = std::collections::BTreeMap::new();
    env.insert("WHARFRAT_PROJECT_DIR".to_owned(), project_dir.to_string());

    let output = run_host_script(&script, &[], project_dir, &env, "/bin/sh")?;
    if !output.status.success() {
        anyhow::bail!(WrError::InvalidConfig(format!(
            "image-cmd exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stdout.is_empty() {
        config.image = stdout;
    }
    Ok(())
}

fn apply_defaults(config: &mut Crate) {
    if config.hostname.is_none() {
        config.hostname = Some("dev".to_owned());
    }
    if config.shell.is_none() {
        config.shell = Some(default_shell());
    }
}

/// Falls back to the host `$SHELL`, then `/bin/sh`. The full chain (§4.1
/// step 7) also checks the image's own shell label first; this crate
/// resolves a crate before any image has been pulled or inspected, so that
/// half of the chain isn't reachable from here — see SPEC_FULL.md's
/// Non-goals.
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn project_with(tmp: &Utf8Path, body: &str) {
        std::fs::write(tmp.join(".wrproject"), body).unwrap();
    }

    #[test]
    fn explicit_override_wins_over_wrcrate_and_default() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        project_with(&root, "default = \"a\"\n[crates.a]\nimage = \"img-a\"\n[crates.b]\nimage = \"img-b\"\n");
        std::fs::write(root.join(".wrcrate"), "a\n").unwrap();

        let resolved = get_crate(&root, Some("b")).unwrap();
        assert_eq!(resolved.name, "b");
        assert_eq!(resolved.config.image, "img-b");
    }

    #[test]
    fn falls_back_to_wrcrate_then_project_default() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        project_with(&root, "default = \"a\"\n[crates.a]\nimage = \"img-a\"\n[crates.b]\nimage = \"img-b\"\n");
        std::fs::write(root.join(".wrcrate"), "b\n").unwrap();

        let resolved = get_crate(&root, None).unwrap();
        assert_eq!(resolved.name, "b");
    }

    #[test]
    fn hostname_and_shell_defaults_are_applied() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        project_with(&root, "[crates.default]\nimage = \"img\"\n");

        let resolved = get_crate(&root, None).unwrap();
        assert_eq!(resolved.config.hostname.as_deref(), Some("dev"));
        assert!(resolved.config.shell.is_some());
    }

    #[test]
    fn image_cmd_output_overrides_image_when_non_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_owned()).unwrap();
        project_with(
            &root,
            "[crates.default]\nimage = \"placeholder\"\nimage-cmd = \"echo resolved-image\"\n",
        );

        let resolved = get_crate(&root, None).unwrap();
        assert_eq!(resolved.config.image, "resolved-image");
    }
}
