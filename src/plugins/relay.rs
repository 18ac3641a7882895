use std::{collections::BTreeSet, net::IpAddr};

use async_trait::async_trait;

use crate::{
    hooks::{Hook, HookContext, Milestone, Outcome},
    smtp::dsn::DsnCode,
};

/// Decides who may have mail delivered through this server: recipients in
/// a local domain, or anything at all from a trusted client.
#[derive(Debug, Clone, Default)]
pub struct Relay {
    /// Lowercased
    domains: BTreeSet<String>,
    clients: BTreeSet<IpAddr>,
}

impl Relay {
    pub fn new(domains: &[String], clients: &[IpAddr]) -> Self {
        Self {
            domains: domains.iter().map(|domain| domain.to_ascii_lowercase()).collect(),
            clients: clients.iter().copied().collect(),
        }
    }

    fn local_domain(&self, domain: &str) -> bool {
        self.domains.contains(&domain.to_ascii_lowercase())
    }
}

#[async_trait]
impl Hook for Relay {
    fn name(&self) -> &str {
        "relay"
    }

    fn registrations(&self) -> &'static [&'static str] {
        &["rcpt"]
    }

    async fn call(&self, _: Milestone, ctx: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
        let Some(recipient) = ctx.address.as_deref() else {
            return Ok(Outcome::DeclineToAct);
        };

        if self.clients.contains(&ctx.session.remote_ip()) || self.local_domain(&recipient.domain) {
            return Ok(Outcome::accept());
        }

        Ok(DsnCode::RelayingDenied.outcome(None))
    }
}

#[cfg(test)]
mod test {
    use super::Relay;
    use crate::{
        hooks::{Hook, HookContext, Milestone, Outcome},
        smtp::{address::Address, session::SessionInfo},
    };

    async fn ask(relay: &Relay, remote: &str, recipient: &str) -> Outcome {
        let mut session = SessionInfo::new("127.0.0.1:25".parse().unwrap(), remote.parse().unwrap());
        let mut address = Address::parse(recipient).unwrap();
        let mut ctx = HookContext::new(&mut session).with_address(&mut address);

        relay.call(Milestone::Rcpt, &mut ctx).await.unwrap()
    }

    #[tokio::test]
    async fn local_domains_and_clients() {
        let relay = Relay::new(
            &["Example.com".to_string()],
            &["192.0.2.10".parse().unwrap()],
        );

        assert!(ask(&relay, "198.51.100.1:4000", "<user@example.COM>").await.is_accept());
        assert!(ask(&relay, "192.0.2.10:4000", "<user@elsewhere.test>").await.is_accept());

        let denied = ask(&relay, "198.51.100.1:4000", "<user@elsewhere.test>").await;
        assert_eq!(denied, Outcome::hard_deny("Relaying denied (#5.7.1)"));
    }

    #[tokio::test]
    async fn declines_without_address() {
        let relay = Relay::default();
        let mut session =
            SessionInfo::new("127.0.0.1:25".parse().unwrap(), "192.0.2.1:1".parse().unwrap());
        let mut ctx = HookContext::new(&mut session);

        assert_eq!(
            relay.call(Milestone::Rcpt, &mut ctx).await.unwrap(),
            Outcome::DeclineToAct
        );
    }
}
