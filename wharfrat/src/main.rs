//! Multi-personality entry point. The binary is installed under (or
//! symlinked to) several names, each resolving to a different role:
//! `wharfrat`/`wr` is the primary CLI, `wr-init` is the privileged
//! in-container helper copied in by the self-archive, and `wr-exec` is the
//! shim launcher a venv's exported binaries re-enter through.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;
mod init;
mod logging;
mod venv;

fn personality() -> String {
    std::env::args()
        .next()
        .map(PathBuf::from)
        .and_then(|p| p.file_name().map(OsStr::to_owned))
        .and_then(|s| s.into_string().ok())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let name = personality();

    let result = match name.as_str() {
        "wr-init" => init::dispatch(&args[1..]).await,
        "wr-exec" => venv::exec_shim(&args).await,
        _ => cli::run(&args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("wharfrat: {e:#}");
            ExitCode::FAILURE
        }
    }
}
