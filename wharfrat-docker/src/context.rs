//! Explicit context object threaded through lifecycle/create functions
//! instead of process-wide mutable state (REDESIGN FLAG): carries the
//! loaded local config and the after-create hook registry. Logging itself
//! stays on the global `log` facade — only the genuinely stateful
//! collaborators (config, hooks) move into `Context`.

use camino::Utf8PathBuf;
use wharfrat_config::LocalConfig;

/// Registered by the venv feature to rebuild its shims once a container has
/// finished provisioning.
pub type AfterCreateHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct Context {
    pub local_config: LocalConfig,
    /// Directory `local_config` was loaded from (`wharfrat_config::config_dir()`)
    /// — distinct from a crate's project root, and what provisioning's
    /// `WR_EXT_CONFIG` must point at.
    pub local_config_dir: Utf8PathBuf,
    after_create: Vec<AfterCreateHook>,
}

impl Context {
    #[must_use]
    pub fn new(local_config: LocalConfig, local_config_dir: Utf8PathBuf) -> Self {
        Self { local_config, local_config_dir, after_create: Vec::new() }
    }

    pub fn register_after_create(&mut self, hook: AfterCreateHook) {
        self.after_create.push(hook);
    }

    /// Invoked once provisioning a fresh container has fully succeeded.
    pub fn run_after_create_hooks(&self, container_id: &str) {
        for hook in &self.after_create {
            hook(container_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn after_create_hooks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = Context::default();
        let a = seen.clone();
        ctx.register_after_create(Box::new(move |id| a.lock().unwrap().push(format!("a:{id}"))));
        let b = seen.clone();
        ctx.register_after_create(Box::new(move |id| b.lock().unwrap().push(format!("b:{id}"))));

        ctx.run_after_create_hooks("abc123");
        assert_eq!(*seen.lock().unwrap(), vec!["a:abc123", "b:abc123"]);
    }
}
