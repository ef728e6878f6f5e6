//! Named error kinds callers can match on, layered under `anyhow` everywhere
//! else — the same split the Go-derived spec draws between "the operation
//! failed" and "the operation failed *this specific, actionable way*".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WrError {
    #[error("no .wrproject found above {0}")]
    ConfigNotFound(String),

    #[error("crate {0:?} not defined in project")]
    CrateNotFound(String),

    #[error("invalid project configuration: {0}")]
    InvalidConfig(String),

    #[error("version control unavailable, proceeding with an empty branch: {0}")]
    VcUnavailable(String),

    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("image {0:?} not found")]
    ImageNotFound(String),

    #[error("failed to pull image {0:?}: {1}")]
    PullFailed(String, String),

    #[error("container {0:?} is stale (config or tool version changed); rerun with --auto-clean or --force")]
    StaleContainer(String),

    #[error("container {0:?} is in unsupported state {1:?}")]
    UnsupportedState(String, String),

    #[error("provisioning container {0:?} failed: {1}")]
    ProvisionFailed(String, String),

    #[error("exec setup failed: {0}")]
    ExecSetupFailed(String),

    #[error("child process exited with code {0}")]
    ChildExit(i32),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}
