//! The `wr-init` personality: the privileged helper copied into a crate's
//! container by the self-archive (§4.3). Dispatches on its first argument
//! (`argv[1]` from the caller's point of view — `main.rs` already stripped
//! `argv[0]`) into one of the sub-commands the host driver and the
//! provisioning pipeline invoke it with.

mod complete;
mod exec;
mod homedir;
mod proxy;
mod search;
mod server;
mod setup;

use std::process::ExitCode;

use anyhow::{bail, Result};

pub async fn dispatch(argv: &[String]) -> Result<ExitCode> {
    let Some((sub, rest)) = argv.split_first() else {
        bail!("wr-init requires a sub-command");
    };

    match sub.as_str() {
        "server" => server::run(rest).await,
        "exec" => exec::run(rest).await,
        "proxy" => proxy::run(rest),
        "setup" => setup::run(rest),
        "homedir" => homedir::run(rest),
        "search" => search::run(rest),
        "complete" => complete::run(rest),
        "version" => {
            println!("wr-init {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        other => bail!("wr-init: unknown sub-command {other:?}"),
    }
}

/// Parses a clap [`clap::Parser`] from a sub-command's own argv, with a
/// synthetic program name prepended — every sub-command here is reached via
/// manual dispatch rather than a derived top-level `Subcommand`, so there's
/// no real `argv[0]` to hand clap.
fn parse_args<A: clap::Parser>(program: &str, argv: &[String]) -> Result<A> {
    let with_program = std::iter::once(program.to_owned()).chain(argv.iter().cloned());
    A::try_parse_from(with_program).map_err(|e| anyhow::anyhow!("{e}"))
}
