//! `wr-init setup`: creates the host-matching user and groups inside a
//! freshly-provisioned container. Shells out to whichever of shadow-utils
//! or busybox provides `useradd`/`groupadd`, detected the same way as the
//! original: by the symlink target of the multi-call binary.

use std::process::{Command, ExitCode, Stdio};

use anyhow::{bail, Context as _, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "wr-init setup")]
struct Args {
    #[arg(long)]
    user: String,
    #[arg(long)]
    uid: u32,
    #[arg(long, default_value = "")]
    gecos: String,
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    gid: u32,
    /// `name` or `name=gid`; repeatable, one per `copy-groups` entry.
    #[arg(long = "create-group")]
    create_group: Vec<String>,
    /// Supplementary group the new user should join; repeatable.
    #[arg(long = "extra-group")]
    extra_group: Vec<String>,
    #[arg(long)]
    mkhome: bool,
}

enum Tooling {
    ShadowUtils,
    Busybox,
}

pub fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-setup", argv)?;
    let tooling = detect_tooling();

    for spec in &args.create_group {
        create_group(&tooling, spec)?;
    }

    create_user(&tooling, &args)?;

    for group in &args.extra_group {
        join_existing_group(&tooling, &args.user, group)?;
    }

    Ok(ExitCode::SUCCESS)
}

fn is_busybox(path: &str) -> bool {
    std::fs::read_link(path).ok().map(|target| target.to_string_lossy().contains("busybox")).unwrap_or(false)
}

fn detect_tooling() -> Tooling {
    if is_busybox("/usr/sbin/adduser") || is_busybox("/usr/sbin/addgroup") {
        Tooling::Busybox
    } else {
        Tooling::ShadowUtils
    }
}

fn create_group(tooling: &Tooling, spec: &str) -> Result<()> {
    let (name, gid) = match spec.split_once('=') {
        Some((name, gid)) => (name, Some(gid)),
        None => (spec, None),
    };

    let mut cmd = match tooling {
        Tooling::ShadowUtils => {
            let mut cmd = Command::new("/usr/sbin/groupadd");
            cmd.arg("--force");
            if let Some(gid) = gid {
                cmd.args(["--gid", gid]);
            }
            cmd.arg(name);
            cmd
        }
        Tooling::Busybox => {
            let mut cmd = Command::new("addgroup");
            if let Some(gid) = gid {
                cmd.args(["-g", gid]);
            }
            cmd.arg(name);
            cmd
        }
    };

    run_logged(&mut cmd).with_context(|| format!("creating group {name}"))
}

fn create_user(tooling: &Tooling, args: &Args) -> Result<()> {
    let uid = args.uid.to_string();
    let gid = args.gid.to_string();

    let mut cmd = match tooling {
        Tooling::ShadowUtils => {
            let mut cmd = Command::new("/usr/sbin/useradd");
            cmd.args(["--uid", &uid]);
            if args.mkhome {
                cmd.arg("--create-home");
            } else {
                cmd.arg("--no-create-home");
            }
            match &args.group {
                Some(group) => {
                    cmd.args(["--gid", group, "--no-user-group"]);
                }
                None => {
                    cmd.args(["--gid", &gid]);
                }
            }
            if !args.gecos.is_empty() {
                cmd.args(["--comment", &args.gecos]);
            }
            cmd.arg(&args.user);
            cmd
        }
        Tooling::Busybox => {
            let mut cmd = Command::new("adduser");
            cmd.arg("-D").args(["-u", &uid]);
            cmd.args(["-G", args.group.as_deref().unwrap_or(&gid)]);
            if !args.gecos.is_empty() {
                cmd.args(["-g", &args.gecos]);
            }
            if !args.mkhome {
                cmd.arg("-H");
            }
            cmd.arg(&args.user);
            cmd
        }
    };

    run_logged(&mut cmd).with_context(|| format!("creating user {}", args.user))
}

fn join_existing_group(tooling: &Tooling, user: &str, group: &str) -> Result<()> {
    let mut cmd = match tooling {
        Tooling::ShadowUtils => {
            let mut cmd = Command::new("/usr/sbin/usermod");
            cmd.args(["-aG", group, user]);
            cmd
        }
        Tooling::Busybox => {
            let mut cmd = Command::new("addgroup");
            cmd.args([user, group]);
            cmd
        }
    };
    run_logged(&mut cmd).with_context(|| format!("joining {user} to {group}"))
}

fn run_logged(cmd: &mut Command) -> Result<()> {
    log::debug!("{cmd:?}");
    let status = cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit()).status().with_context(|| format!("spawning {cmd:?}"))?;
    if !status.success() {
        bail!("{cmd:?} exited with {status}");
    }
    Ok(())
}
