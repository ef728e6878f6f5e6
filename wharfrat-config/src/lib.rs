//! Project/crate data model, `.wrproject`/`.wrcrate` resolution, container
//! identity, and per-user local state (config, auth cache).

mod crate_model;
mod error;
mod identity;
mod local;
mod project;
mod resolve;
mod script;
mod unknown_keys;
pub mod vc;

pub use crate_model::Crate;
pub use error::WrError;
pub use identity::{container_name, ContainerName, Labels};
pub use local::{config_dir, AuthCache, Credential, LocalConfig};
pub use project::Project;
pub use resolve::{get_crate, open_vc_crate, ResolvedCrate};
pub use script::run_host_script;
