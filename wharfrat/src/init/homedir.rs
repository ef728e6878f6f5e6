//! `wr-init homedir <user>`: prints a user's home directory, accepting
//! either a username or a numeric uid — used to resolve
//! `working-dir = home` without the host needing its own idea of the
//! container's user database.

use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "wr-init homedir")]
struct Args {
    user: String,
}

pub fn run(argv: &[String]) -> Result<ExitCode> {
    let args = super::parse_args::<Args>("wr-init-homedir", argv)?;

    let user = match nix::unistd::User::from_name(&args.user).context("looking up user by name")? {
        Some(user) => Some(user),
        None => match args.user.parse::<u32>() {
            Ok(uid) => nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)).context("looking up user by uid")?,
            Err(_) => None,
        },
    };

    let Some(user) = user else { bail!("unknown user: {}", args.user) };
    println!("{}", user.dir.display());
    Ok(ExitCode::SUCCESS)
}
