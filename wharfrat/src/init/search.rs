//! `wr-init search`: glob-expands each pattern (after shell-style env
//! variable expansion) and prints matches filtered by kind, backing the
//! venv feature's `export-bin` discovery.

use std::os::unix::fs::PermissionsExt as _;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "wr-init search")]
struct Args {
    /// Print every match regardless of kind.
    #[arg(short = 'a')]
    all: bool,
    /// Only regular, executable files.
    #[arg(short = 'x')]
    executable: bool,
    /// Only regular files.
    #[arg(short = 'f')]
    file: bool,
    /// Only directories.
    #[arg(short = 'd')]
    directory: bool,
    #[arg(trailing_var_arg = true)]
    patterns: Vec<String>,
}

pub fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-search", argv)?;

    for pattern in &args.patterns {
        let expanded = expand_env(pattern);
        let Ok(paths) = glob::glob(&expanded) else { continue };
        for path in paths.flatten() {
            if wanted(&args, &path) {
                println!("{}", path.display());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn wanted(args: &Args, path: &std::path::Path) -> bool {
    if args.all {
        return true;
    }
    let Ok(meta) = std::fs::metadata(path) else {
        log::warn!("failed to stat {}", path.display());
        return false;
    };
    if args.directory && meta.is_dir() {
        return true;
    }
    if !meta.is_file() {
        return false;
    }
    if args.file {
        return true;
    }
    args.executable && meta.permissions().mode() & 0o111 != 0
}

/// `$VAR` / `${VAR}` expansion against the process environment, matching
/// the original's `os.ExpandEnv` before globbing.
fn expand_env(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            out.push_str(&std::env::var(&name).unwrap_or_default());
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_braced_and_bare_vars() {
        std::env::set_var("WR_INIT_SEARCH_TEST", "/opt/x");
        assert_eq!(expand_env("${WR_INIT_SEARCH_TEST}/bin/*"), "/opt/x/bin/*");
        assert_eq!(expand_env("$WR_INIT_SEARCH_TEST/bin/*"), "/opt/x/bin/*");
        std::env::remove_var("WR_INIT_SEARCH_TEST");
    }
}
