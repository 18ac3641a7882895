use std::sync::{Arc, LazyLock};

use tokio::sync::broadcast;

use crate::{
    config::{Config, QueueDecline},
    hooks::{Hook, Milestone, Registry},
    internal,
    listener::Listener,
    logging, plugins, Signal,
};

/// Process-wide shutdown channel. [`Signal::Shutdown`] stops the listener;
/// [`Signal::Finalised`] follows once every session has ended.
pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Owns the configuration and hook bundles, and runs the server until
/// interrupted
pub struct Controller {
    config: Config,
    bundles: Vec<Arc<dyn Hook>>,
}

impl Controller {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            bundles: Vec::new(),
        }
    }

    /// Add a bundle that is not described by configuration. Bundles are
    /// registered after every `[[plugin]]`, in the order added.
    #[must_use]
    pub fn with_bundle(mut self, bundle: Arc<dyn Hook>) -> Self {
        self.bundles.push(bundle);
        self
    }

    /// Build the registry every session will share.
    ///
    /// # Errors
    /// If a bundle names an unknown milestone, or the queue policy is
    /// `fatal` and nothing answers the `queue` milestone.
    pub fn registry(&self) -> anyhow::Result<Registry> {
        let mut registry = Registry::new();

        plugins::load(&mut registry, &self.config.plugins)?;
        for bundle in &self.bundles {
            let count = registry.scan(Arc::clone(bundle))?;
            internal!(level = INFO, "Loaded {} for {count} milestone(s)", bundle.name());
        }

        if registry.hooks(Milestone::Queue).is_empty() {
            if self.config.queue_decline == QueueDecline::Fatal {
                anyhow::bail!("queue_decline is 'fatal' but no handler is registered for 'queue'");
            }

            internal!(
                level = WARN,
                "No handler is registered for 'queue'; every message will be deferred"
            );
        }

        Ok(registry)
    }

    /// Run the listener until SIGINT or SIGTERM, then drain sessions.
    /// A second signal abandons the drain.
    ///
    /// # Errors
    /// If the registry cannot be built or the listener fails to start.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        let registry = Arc::new(self.registry()?);
        let listener = Listener::from_config(&self.config, registry);
        let server = listener.serve(SHUTDOWN_BROADCAST.subscribe());
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => return Ok(result?),
            () = interrupted() => {}
        }

        internal!(level = INFO, "Shutting down -- interrupt again to force");
        if SHUTDOWN_BROADCAST.send(Signal::Shutdown).is_err() {
            internal!(level = WARN, "No one was listening for shutdown");
        }

        tokio::select! {
            result = &mut server => {
                result?;
                let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
                internal!(level = INFO, "All sessions finished");
            }
            () = interrupted() => {
                internal!(level = WARN, "Forced shutdown, abandoning open sessions");
            }
        }

        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn interrupted() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            internal!(level = ERROR, "Unable to listen for CTRL+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                internal!(level = ERROR, "Unable to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod test {
    use std::{path::PathBuf, sync::Arc};

    use async_trait::async_trait;

    use super::Controller;
    use crate::{
        config::{Config, PluginConfig, QueueDecline},
        hooks::{Hook, HookContext, Milestone, Outcome},
    };

    struct Discard;

    #[async_trait]
    impl Hook for Discard {
        fn name(&self) -> &str {
            "discard"
        }

        fn registrations(&self) -> &'static [&'static str] {
            &["queue"]
        }

        async fn call(&self, _: Milestone, _: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
            Ok(Outcome::accept_with("Discarded"))
        }
    }

    fn fatal() -> Config {
        Config {
            queue_decline: QueueDecline::Fatal,
            ..Config::default()
        }
    }

    #[test]
    fn fatal_policy_needs_a_queue() {
        assert!(Controller::new(fatal()).registry().is_err());
        assert!(Controller::new(Config::default()).registry().is_ok());

        let registry = Controller::new(fatal())
            .with_bundle(Arc::new(Discard))
            .registry()
            .unwrap();
        assert_eq!(registry.hooks(Milestone::Queue).len(), 1);
    }

    #[test]
    fn plugins_before_bundles() {
        let config = Config {
            plugins: vec![PluginConfig::QueueDir {
                path: PathBuf::from("/tmp/waymark-test-queue"),
            }],
            ..fatal()
        };

        let registry = Controller::new(config)
            .with_bundle(Arc::new(Discard))
            .registry()
            .unwrap();

        let names: Vec<_> = registry
            .hooks(Milestone::Queue)
            .iter()
            .map(|hook| hook.name().to_string())
            .collect();
        assert_eq!(names, ["queue_dir", "discard"]);
    }
}
