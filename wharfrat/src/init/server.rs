//! `wr-init server`: the container's pid 1. Re-asserts the setuid bit on
//! `/sbin/wr-init` (extraction can drop it) and reaps exited children for
//! the lifetime of the container, same as any other init.

use std::os::unix::fs::PermissionsExt as _;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt as _;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

const WR_INIT_PATH: &str = "/sbin/wr-init";
const SETUID_SETGID_0755: u32 = 0o6755;

#[derive(Parser)]
#[command(name = "wr-init server")]
struct Args {
    #[arg(long)]
    debug: bool,
}

pub async fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-server", argv)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if args.debug { "debug" } else { "info" })).init();

    reassert_setuid().context("restoring wr-init setuid bit")?;

    let mut signals = signal_hook_tokio::Signals::new([signal_hook::consts::SIGCHLD]).context("installing SIGCHLD handler")?;
    log::info!("wr-init server: pid 1 running, reaping children");

    while signals.next().await.is_some() {
        reap_children();
    }

    // The signal stream only ends if its underlying registration is torn
    // down, which nothing here does; block rather than exit pid 1.
    std::future::pending::<()>().await;
    Ok(ExitCode::SUCCESS)
}

fn reassert_setuid() -> Result<()> {
    let mut perms = std::fs::metadata(WR_INIT_PATH)?.permissions();
    perms.set_mode(SETUID_SETGID_0755);
    std::fs::set_permissions(WR_INIT_PATH, perms)?;
    Ok(())
}

fn reap_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => log::debug!("reaped {status:?}"),
            Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => {
                log::warn!("waitpid: {e}");
                break;
            }
        }
    }
}
