//! `wr-init complete`: shell completion for the word under the cursor,
//! globbing path-like prefixes and filtering by executable-ness for the
//! first word of the command line.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "wr-init complete")]
struct Args {
    #[arg(short = 'l', long)]
    line: Option<String>,
    #[arg(short = 'c', long, default_value_t = -1)]
    current: i64,
    #[arg(short = 'p', long, default_value_t = -1)]
    point: i64,
    #[arg(trailing_var_arg = true)]
    words: Vec<String>,
}

pub fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-complete", argv)?;
    let _ = (&args.line, args.point);

    if args.current < 0 || args.current as usize >= args.words.len() {
        return Ok(ExitCode::SUCCESS);
    }
    let current = args.current as usize;
    let cmd_start = if args.words.len() >= 2 { 1 } else { usize::MAX };

    complete_word(&args.words[current], current == cmd_start, &args.words[current]);
    Ok(ExitCode::SUCCESS)
}

fn complete_word(word: &str, is_command: bool, original: &str) {
    let mut matches = if word.starts_with('/') || word.starts_with("./") { glob_prefix(word) } else { Vec::new() };

    matches = if is_command { filter_executable(matches) } else { mark_dirs(matches) };

    if let [only] = matches.as_slice() {
        if only != original {
            complete_word(only, is_command, original);
            return;
        }
    }

    for m in matches {
        println!("{m}");
    }
}

fn glob_prefix(word: &str) -> Vec<String> {
    let pattern = format!("{word}*");
    glob::glob(&pattern).map(|paths| paths.flatten().filter_map(|p| p.into_os_string().into_string().ok()).collect()).unwrap_or_default()
}

fn mark_dirs(paths: Vec<String>) -> Vec<String> {
    paths
        .into_iter()
        .filter_map(|p| {
            let meta = std::fs::metadata(&p).ok()?;
            Some(if meta.is_dir() { format!("{p}/") } else { p })
        })
        .collect()
}

fn filter_executable(paths: Vec<String>) -> Vec<String> {
    use std::os::unix::fs::PermissionsExt as _;
    paths
        .into_iter()
        .filter_map(|p| {
            let meta = std::fs::metadata(&p).ok()?;
            if meta.is_dir() {
                Some(format!("{p}/"))
            } else if meta.permissions().mode() & 0o111 != 0 {
                Some(p)
            } else {
                None
            }
        })
        .collect()
}
