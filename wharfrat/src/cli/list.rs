//! `list`: every container this tool is tracking, with a live freshness
//! check against the project files on disk (or table/JSON dual output).

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8Path;
use clap::Args as ClapArgs;

use wharfrat_config::{vc, Project, WrError};
use wharfrat_docker::{Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    /// JSON output instead of a table.
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TriState {
    Green,
    Amber,
    Red,
    Normal,
    Dark,
}

impl TriState {
    fn ansi(self) -> &'static str {
        match self {
            TriState::Green => "\x1b[32m",
            TriState::Amber => "\x1b[33m",
            TriState::Red => "\x1b[31m",
            TriState::Normal => "\x1b[0m",
            TriState::Dark => "\x1b[30;1m",
        }
    }
}

struct Entry {
    name: String,
    project: (String, TriState),
    crate_name: (String, TriState),
    image: String,
    state: String,
    branch: (String, TriState),
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    let client = Client::connect(None)?;
    let containers = client.list_wharfrat_containers().await?;
    log::debug!("list: found {} containers", containers.len());

    let mut entries = Vec::new();
    let mut project_prefix_tree: BTreeMap<String, ()> = BTreeMap::new();

    for container in &containers {
        let labels = container.labels.clone().unwrap_or_default();
        let project_root = labels.get("rat.wharf.project").cloned().unwrap_or_default();
        let crate_name = labels.get("rat.wharf.crate").cloned().unwrap_or_default();
        let cfg = labels.get("rat.wharf.config").cloned().unwrap_or_default();
        let branch = labels.get("rat.wharf.branch").cloned().unwrap_or_default();

        let name = container.names.as_ref().and_then(|n| n.first()).map(|n| n.trim_start_matches('/').to_owned()).unwrap_or_default();
        let image = container.image.clone().unwrap_or_default();
        let state = container.state.clone().unwrap_or_default();

        project_prefix_tree.insert(project_root.clone(), ());

        let project_dir = Utf8Path::new(&project_root);
        let project_branch = vc::current_branch(project_dir);

        let resolved_crate = resolve_for_list(project_dir, &branch, &project_branch, &crate_name)?;

        let project_state = if project_dir.is_dir() { TriState::Green } else { TriState::Red };
        let (branch_display, branch_state) = if branch.is_empty() {
            ("<unknown>".to_owned(), TriState::Dark)
        } else if branch != project_branch && resolved_crate.is_none() {
            (branch.clone(), TriState::Red)
        } else {
            (branch.clone(), TriState::Normal)
        };

        let crate_state = match &resolved_crate {
            None => TriState::Red,
            Some(c) if c.fingerprint() != cfg => TriState::Amber,
            Some(_) => TriState::Green,
        };

        entries.push(Entry {
            name,
            project: (project_root, project_state),
            crate_name: (crate_name, crate_state),
            image,
            state,
            branch: (branch_display, branch_state),
        });
    }

    if args.json {
        print_json(&entries);
    } else {
        print_table(&entries);
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_for_list(
    project_dir: &Utf8Path,
    branch: &str,
    project_branch: &str,
    crate_name: &str,
) -> Result<Option<wharfrat_config::Crate>> {
    if branch.is_empty() || branch == project_branch {
        return match Project::locate(project_dir) {
            Ok(project) => match project.crate_named(crate_name) {
                Ok(c) => Ok(Some(c.clone())),
                Err(WrError::CrateNotFound(_)) => Ok(None),
                Err(e) => Err(e.into()),
            },
            Err(_) => Ok(None),
        };
    }

    let project_path = project_dir.join(".wrproject");
    if vc::read_file_at_branch(project_dir, branch, ".wrproject").is_none() {
        return Ok(None);
    }
    match wharfrat_config::open_vc_crate(&project_path, branch, crate_name) {
        Ok(resolved) => Ok(Some(resolved.config)),
        Err(e) => match e.downcast_ref::<WrError>() {
            Some(WrError::CrateNotFound(_)) => Ok(None),
            _ => Ok(None),
        },
    }
}

fn print_json(entries: &[Entry]) {
    println!("[");
    for (i, e) in entries.iter().enumerate() {
        print!("  {{");
        print!(" \"name\": \"{}\",", e.name);
        print!(" \"project\": \"{}\",", e.project.0);
        print!(" \"branch\": \"{}\",", e.branch.0);
        print!(" \"crate\": \"{}\",", e.crate_name.0);
        print!(" \"image\": \"{}\",", e.image);
        print!(" \"state\": \"{}\"", e.state);
        print!(" }}");
        if i + 1 < entries.len() {
            print!(",");
        }
        println!();
    }
    println!("]");
}

fn print_table(entries: &[Entry]) {
    let prefix = common_prefix(entries.iter().map(|e| e.project.0.as_str()));
    let shortened: Vec<String> = entries
        .iter()
        .map(|e| if prefix.len() > 3 { e.project.0.replacen(&prefix, "...", 1) } else { e.project.0.clone() })
        .collect();

    let w_name = entries.iter().map(|e| e.name.len()).max().unwrap_or(0).max(14);
    let w_project = shortened.iter().map(String::len).max().unwrap_or(0).max(14);
    let w_branch = entries.iter().map(|e| e.branch.0.len()).max().unwrap_or(0).max(16);
    let w_crate = entries.iter().map(|e| e.crate_name.0.len()).max().unwrap_or(0).max(5);
    let w_image = entries.iter().map(|e| e.image.len()).max().unwrap_or(0).max(5);

    println!(
        "\x1b[37;1m{:w_name$}\x1b[0m | \x1b[37;1m{:w_project$}\x1b[0m | \x1b[37;1m{:w_branch$}\x1b[0m | \x1b[37;1m{:w_crate$}\x1b[0m | \x1b[37;1m{:w_image$}\x1b[0m | \x1b[37;1mContainer State\x1b[0m",
        "Container Name", "Project Folder", "Container Branch", "Crate", "Image",
    );
    println!(
        "{}-+-{}-+-{}-+-{}-+-{}-+-{}",
        "-".repeat(w_name),
        "-".repeat(w_project),
        "-".repeat(w_branch),
        "-".repeat(w_crate),
        "-".repeat(w_image),
        "-".repeat(15),
    );
    for (e, project) in entries.iter().zip(shortened.iter()) {
        println!(
            "{:w_name$}\x1b[0m | {}{:w_project$}\x1b[0m | {}{:w_branch$}\x1b[0m | {}{:w_crate$}\x1b[0m | {:w_image$}\x1b[0m | {}\x1b[0m",
            e.name,
            e.project.1.ansi(), project,
            e.branch.1.ansi(), e.branch.0,
            e.crate_name.1.ansi(), e.crate_name.0,
            e.image,
            e.state,
        );
    }
}

/// Longest shared leading path component across every project directory —
/// mirrors the single-branch `tree.Prefix()` walk from the original.
fn common_prefix<'a>(paths: impl Iterator<Item = &'a str>) -> String {
    let mut iter = paths.map(|p| p.split('/').collect::<Vec<_>>());
    let Some(first) = iter.next() else { return String::new() };
    let mut common = first;
    for parts in iter {
        let n = common.iter().zip(parts.iter()).take_while(|(a, b)| a == b).count();
        common.truncate(n);
    }
    if common.len() <= 1 {
        String::new()
    } else {
        common.join("/")
    }
}
