use async_trait::async_trait;

use crate::{
    hooks::{Hook, HookContext, Milestone, Outcome},
    smtp::dsn::DsnCode,
};

/// Rejects messages that have already passed through too many servers,
/// counting `Received` and `Delivered-To` headers. A message carrying
/// exactly `max_hops` of them is still accepted.
#[derive(Debug, Clone, Copy)]
pub struct CheckLoop {
    max_hops: usize,
}

impl CheckLoop {
    #[must_use]
    pub const fn new(max_hops: usize) -> Self {
        Self { max_hops }
    }
}

#[async_trait]
impl Hook for CheckLoop {
    fn name(&self) -> &str {
        "check_loop"
    }

    fn registrations(&self) -> &'static [&'static str] {
        &["data_post"]
    }

    async fn call(&self, _: Milestone, ctx: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
        let Some(transaction) = ctx.transaction.as_deref() else {
            return Ok(Outcome::DeclineToAct);
        };

        let hops = transaction
            .headers()?
            .iter()
            .filter(|(name, _)| {
                name.eq_ignore_ascii_case("received") || name.eq_ignore_ascii_case("delivered-to")
            })
            .count();

        if hops > self.max_hops {
            return Ok(DsnCode::TooManyHops.outcome(None));
        }

        Ok(Outcome::DeclineToAct)
    }
}
