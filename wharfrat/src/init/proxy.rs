//! `wr-init proxy`: the legacy v1 exec wrapper. Runs under the exec'd
//! command's own pid (no fork), so everything here either mutates the
//! current process in place or execs over it.

use std::ffi::CString;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "wr-init proxy")]
struct Args {
    /// Perform the PROXY READY / PROXY RUN handshake before anything else.
    #[arg(long)]
    sync: bool,
    /// Working directory, for engines too old to set it via the exec API.
    #[arg(long)]
    workdir: Option<String>,
    /// Supplementary group to join; repeatable.
    #[arg(long = "group")]
    groups: Vec<String>,
    /// Directory to prepend to PATH; repeatable, in order.
    #[arg(long = "prepend-path")]
    prepend_path: Vec<String>,
    /// Directory to append to PATH; repeatable, in order.
    #[arg(long = "append-path")]
    append_path: Vec<String>,
    /// Uid to drop privileges to, once groups are joined.
    #[arg(long)]
    uid: Option<u32>,
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

pub fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-proxy", argv)?;
    if args.command.is_empty() {
        bail!("wr-init proxy requires a command to run");
    }

    if args.sync {
        handshake().context("proxy handshake")?;
    }

    if let Some(dir) = &args.workdir {
        std::env::set_current_dir(dir).with_context(|| format!("chdir {dir}"))?;
    }

    if !args.groups.is_empty() {
        join_groups(&args.groups).context("joining supplementary groups")?;
    }

    if let Some(uid) = args.uid {
        drop_privileges(uid).context("dropping privileges")?;
    }

    apply_path(&args.prepend_path, &args.append_path);

    exec_argv(&args.command)
}

fn handshake() -> Result<()> {
    use std::io::{BufRead as _, Write as _};
    let mut stdout = std::io::stdout();
    stdout.write_all(b"PROXY READY\n").context("writing handshake marker")?;
    stdout.flush().context("flushing handshake marker")?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("reading run marker")?;
    anyhow::ensure!(line.trim_end() == "PROXY RUN", "unexpected handshake reply: {line:?}");
    Ok(())
}

fn join_groups(names: &[String]) -> Result<()> {
    let mut gids = Vec::with_capacity(names.len());
    for name in names {
        let group = nix::unistd::Group::from_name(name)
            .with_context(|| format!("looking up group {name}"))?
            .ok_or_else(|| anyhow!("unknown group: {name}"))?;
        gids.push(group.gid);
    }
    nix::unistd::setgroups(&gids).context("setgroups")
}

fn drop_privileges(uid: u32) -> Result<()> {
    let uid = nix::unistd::Uid::from_raw(uid);
    let gid = nix::unistd::User::from_uid(uid)
        .context("looking up target user")?
        .map(|u| u.gid)
        .unwrap_or_else(|| nix::unistd::Gid::from_raw(uid.as_raw()));

    // Group first: once the uid is dropped, we no longer have permission to
    // change it.
    nix::unistd::setregid(gid, gid).context("setregid")?;
    nix::unistd::setreuid(uid, uid).context("setreuid")
}

fn apply_path(prepend: &[String], append: &[String]) {
    if prepend.is_empty() && append.is_empty() {
        return;
    }
    let current = std::env::var("PATH").unwrap_or_default();
    let mut parts: Vec<String> = prepend.to_vec();
    if !current.is_empty() {
        parts.push(current);
    }
    parts.extend(append.iter().cloned());
    std::env::set_var("PATH", parts.join(":"));
}

/// Replaces the current process image, searching `PATH` the way a shell
/// would — mirrors the original's `exec.LookPath` + `syscall.Exec`.
fn exec_argv(argv: &[String]) -> Result<ExitCode> {
    let program = CString::new(argv[0].as_bytes()).context("program name has an embedded NUL")?;
    let args: Vec<CString> =
        argv.iter().map(|a| CString::new(a.as_bytes())).collect::<std::result::Result<_, _>>().context("argument has an embedded NUL")?;

    nix::unistd::execvp(&program, &args).with_context(|| format!("exec {}", argv[0]))?;
    unreachable!("execvp only returns on error")
}
