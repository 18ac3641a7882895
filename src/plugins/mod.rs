//! Handler bundles that ship with the server, selected by `[[plugin]]`
//! tables in the configuration.

mod check_loop;
mod queue_dir;
mod relay;

use std::sync::Arc;

pub use self::{check_loop::CheckLoop, queue_dir::QueueDir, relay::Relay};
use crate::{
    config::PluginConfig,
    error::RegistryError,
    hooks::{Hook, Registry},
    internal,
};

/// Construct the bundle described by `config`
#[must_use]
pub fn build(config: &PluginConfig) -> Arc<dyn Hook> {
    match config {
        PluginConfig::Relay { domains, clients } => Arc::new(Relay::new(domains, clients)),
        PluginConfig::CheckLoop { max_hops } => Arc::new(CheckLoop::new(*max_hops)),
        PluginConfig::QueueDir { path } => Arc::new(QueueDir::new(path.clone())),
    }
}

/// Build and register every configured bundle, in order.
///
/// # Errors
/// If a bundle's registration table names an unknown milestone.
pub fn load(registry: &mut Registry, plugins: &[PluginConfig]) -> Result<usize, RegistryError> {
    let mut registered = 0;

    for config in plugins {
        let hook = build(config);
        let name = hook.name().to_string();
        let count = registry.scan(hook)?;

        internal!(level = INFO, "Loaded {name} for {count} milestone(s)");
        registered += count;
    }

    Ok(registered)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::load;
    use crate::{
        config::PluginConfig,
        hooks::{Milestone, Registry},
    };

    #[test]
    fn load_registers_each_table() {
        let mut registry = Registry::new();
        let count = load(
            &mut registry,
            &[
                PluginConfig::Relay {
                    domains: vec!["example.com".to_string()],
                    clients: Vec::new(),
                },
                PluginConfig::CheckLoop { max_hops: 10 },
                PluginConfig::QueueDir {
                    path: PathBuf::from("/tmp/waymark-queue"),
                },
            ],
        )
        .unwrap();

        assert_eq!(count, 3);
        assert_eq!(registry.hooks(Milestone::Rcpt)[0].name(), "relay");
        assert_eq!(registry.hooks(Milestone::DataPost)[0].name(), "check_loop");
        assert_eq!(registry.hooks(Milestone::Queue)[0].name(), "queue_dir");
        assert!(registry.hooks(Milestone::Helo).is_empty());
    }
}
