//! `login`: save registry credentials for image pulls.

use std::io::{BufRead, Write};
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args as ClapArgs;

use wharfrat_config::{config_dir, AuthCache, Credential};
use wharfrat_docker::Context;

const DEFAULT_REGISTRY: &str = "index.docker.io";

#[derive(ClapArgs)]
pub struct Args {
    /// Registry server; defaults to the Docker Hub index.
    pub server: Option<String>,
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,
    #[arg(short = 'p', long = "password")]
    pub pass: Option<String>,
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    let server = args.server.unwrap_or_else(|| DEFAULT_REGISTRY.to_owned());
    log::debug!("login: {server}");

    let is_tty = wharfrat_docker::is_tty(&std::io::stdin());

    if args.pass.is_none() && !is_tty {
        bail!("unable to request password without a terminal");
    }

    let username = match args.user {
        Some(u) => u,
        None => prompt("Username")?,
    };
    let password = match args.pass {
        Some(p) => p,
        None => prompt_password("Password")?,
    };

    if username.is_empty() {
        bail!("username required");
    }
    if password.is_empty() {
        bail!("password required");
    }

    log::debug!("login: user={username}, server={server}");

    let dir = config_dir();
    let mut auth = AuthCache::load(&dir)?;
    auth.set(Credential { username, password, server_address: server })?;

    Ok(ExitCode::SUCCESS)
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

/// Reads a line with local echo disabled, matching the original's
/// `term.DisableEcho`/`RestoreTerminal` pairing.
fn prompt_password(label: &str) -> Result<String> {
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

    print!("{label}: ");
    std::io::stdout().flush()?;

    let stdin_fd = std::io::stdin();
    let original = tcgetattr(&stdin_fd).ok();
    if let Some(term) = &original {
        let mut raw = term.clone();
        raw.local_flags.remove(LocalFlags::ECHO);
        let _ = tcsetattr(&stdin_fd, SetArg::TCSANOW, &raw);
    }

    let mut line = String::new();
    let result = std::io::stdin().lock().read_line(&mut line);

    if let Some(term) = &original {
        let _ = tcsetattr(&stdin_fd, SetArg::TCSANOW, term);
    }
    println!();

    result?;
    Ok(line.trim().to_owned())
}
