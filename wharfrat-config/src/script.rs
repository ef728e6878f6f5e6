//! Running a crate's small embedded scripts (`image-cmd`, `setup-prep`) as
//! host child processes. Shebang-respecting: a script beginning with `#!`
//! is split with shell-word rules and exec'd as its own interpreter line;
//! otherwise it's handed to a default interpreter as a `-c` argument.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};
use camino::Utf8Path;

/// Runs `script` as a host process with its full text piped to the chosen
/// interpreter's stdin. A script beginning with `#!` picks its own
/// interpreter line (shell-word split); otherwise `default_interpreter` runs
/// with no arguments and reads the script from stdin, the same convention
/// `/bin/sh` accepts. `args` are appended to the interpreter's own argv —
/// this is how `setup-prep` receives `[project-dir, crate-name]`.
pub fn run_host_script(
    script: &str,
    args: &[&str],
    cwd: &Utf8Path,
    env: &BTreeMap<String, String>,
    default_interpreter: &str,
) -> Result<Output> {
    let trimmed = script.trim_start();
    let mut command = if let Some(rest) = trimmed.strip_prefix("#!") {
        let (shebang_line, _) = rest.split_once('\n').unwrap_or((rest, ""));
        let words = shell_words::split(shebang_line.trim())
            .with_context(|| format!("parsing shebang line {shebang_line:?}"))?;
        let (interp, interp_args) = words.split_first().context("empty shebang line")?;
        let mut c = Command::new(interp);
        c.args(interp_args);
        c
    } else {
        Command::new(default_interpreter)
    };

    command.args(args).current_dir(cwd).envs(env).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().with_context(|| format!("spawning script interpreter in {cwd}"))?;
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(script.as_bytes())
        .context("writing script body to interpreter stdin")?;
    child.wait_with_output().with_context(|| format!("running script in {cwd}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_with_default_interpreter_when_no_shebang() {
        let out = run_host_script("echo hi", &[], Utf8Path::new("/tmp"), &BTreeMap::new(), "sh").unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hi");
    }

    #[test]
    fn honors_explicit_shebang() {
        let script = "#!/bin/sh\necho from-shebang\n";
        let out = run_host_script(script, &[], Utf8Path::new("/tmp"), &BTreeMap::new(), "ignored").unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "from-shebang");
    }
}
