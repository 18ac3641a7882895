//! Hook registry and dispatch.
//!
//! Hooks are the only way policy enters the server: at each [`Milestone`]
//! the session asks the registered hooks, in registration order, until one
//! of them gives a decisive [`Outcome`].

mod context;
mod milestone;
mod outcome;

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

pub use self::{
    context::HookContext,
    milestone::Milestone,
    outcome::{Detail, Outcome, Severity},
};
use crate::{
    error::{DispatchError, RegistryError},
    internal,
};

/// A handler bundle.
///
/// [`Hook::registrations`] is the bundle's registration table: the names of
/// the milestones it answers. [`Registry::scan`] consumes it, so one bundle
/// can answer any subset of milestones through a single [`Hook::call`].
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn registrations(&self) -> &'static [&'static str] {
        &[]
    }

    /// Answer `milestone`.
    ///
    /// # Errors
    /// An error is a fault in the hook, not a decision. The session reports
    /// it to the client as a temporary failure and disconnects.
    async fn call(&self, milestone: Milestone, ctx: &mut HookContext<'_>)
        -> anyhow::Result<Outcome>;
}

/// Milestone to hooks, in registration order.
///
/// Populated before the listener starts and shared read-only between
/// sessions afterwards.
#[derive(Default)]
pub struct Registry {
    hooks: BTreeMap<Milestone, Vec<Arc<dyn Hook>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `hook` to the hooks for `milestone`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownMilestone`] if the name is not a milestone.
    pub fn register(&mut self, milestone: &str, hook: Arc<dyn Hook>) -> Result<(), RegistryError> {
        let milestone = milestone.parse::<Milestone>()?;

        internal!("Registering {} for {milestone}", hook.name());
        self.hooks.entry(milestone).or_default().push(hook);

        Ok(())
    }

    /// Remove the first registration of `hook` for `milestone`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownMilestone`] if the name is not a milestone,
    /// [`RegistryError::HandlerNotFound`] if `hook` is not registered there.
    pub fn deregister(&mut self, milestone: &str, hook: &Arc<dyn Hook>) -> Result<(), RegistryError> {
        let milestone = milestone.parse::<Milestone>()?;

        let hooks = self.hooks.entry(milestone).or_default();
        let position = hooks
            .iter()
            .position(|registered| Arc::ptr_eq(registered, hook))
            .ok_or_else(|| RegistryError::HandlerNotFound {
                milestone,
                hook: hook.name().to_string(),
            })?;

        hooks.remove(position);

        Ok(())
    }

    /// Register `hook` under every milestone named in its registration
    /// table. Nothing is registered if any name is unknown.
    ///
    /// # Errors
    /// [`RegistryError::UnknownMilestone`] for the first unknown name.
    pub fn scan(&mut self, hook: Arc<dyn Hook>) -> Result<usize, RegistryError> {
        let milestones = hook
            .registrations()
            .iter()
            .map(|name| name.parse::<Milestone>())
            .collect::<Result<Vec<_>, _>>()?;

        for milestone in &milestones {
            self.register(milestone.name(), Arc::clone(&hook))?;
        }

        Ok(milestones.len())
    }

    #[must_use]
    pub fn hooks(&self, milestone: Milestone) -> &[Arc<dyn Hook>] {
        self.hooks.get(&milestone).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }

    /// Ask each hook for `milestone` in turn. The first decisive outcome is
    /// returned and the remaining hooks are skipped; with no decisive
    /// answer the result is [`Outcome::DeclineToAct`].
    ///
    /// # Errors
    /// [`DispatchError::HandlerFault`] if a hook fails. Hooks already called
    /// keep whatever changes they made.
    pub async fn dispatch(
        &self,
        milestone: Milestone,
        ctx: &mut HookContext<'_>,
    ) -> Result<Outcome, DispatchError> {
        let hooks = self.hooks(milestone);
        if hooks.is_empty() {
            return Ok(Outcome::DeclineToAct);
        }

        internal!(
            id = ctx.session.id(),
            level = DEBUG,
            "Dispatching {milestone} to {} hooks",
            hooks.len()
        );

        for hook in hooks {
            match hook.call(milestone, ctx).await {
                Ok(Outcome::DeclineToAct) => {}
                Ok(outcome) => {
                    internal!(
                        id = ctx.session.id(),
                        level = DEBUG,
                        "{} answered {milestone} with {outcome}",
                        hook.name()
                    );
                    return Ok(outcome);
                }
                Err(err) => {
                    internal!(
                        id = ctx.session.id(),
                        level = ERROR,
                        "{} failed during {milestone}: {err:#}",
                        hook.name()
                    );
                    return Err(DispatchError::HandlerFault {
                        milestone,
                        hook: hook.name().to_string(),
                        reason: format!("{err:#}"),
                    });
                }
            }
        }

        Ok(Outcome::DeclineToAct)
    }
}
