//! Container engine facade: the typed client wrapper, the lifecycle state
//! machine, the create+provision pipeline, the self-archive builder, the
//! host-side exec driver, and the explicit [`Context`] threaded through all
//! of the above in place of process-wide mutable state.

mod client;
mod context;
mod create;
mod env;
mod exec;
mod lifecycle;
mod selfarchive;

pub use client::Client;
pub use context::{AfterCreateHook, Context};
pub use create::{create, CreateRequest};
pub use env::{build_env, ReservedEnv};
pub use exec::{exec_cmd, get_output, is_tty, needs_proxy_wrapper, resolve_workdir, wrap_argv, ExecOutcome, ExecRequest, Workdir};
pub use lifecycle::{ensure_removed, ensure_running, ensure_stopped, inspect, Decision, Inspection, State};
pub use selfarchive::{build as build_self_archive, read_self_exe};
