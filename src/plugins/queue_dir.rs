use std::path::PathBuf;

use async_trait::async_trait;
use ulid::Ulid;

use crate::{
    hooks::{Hook, HookContext, Milestone, Outcome},
    internal,
};

/// Queues each message as `<ulid>.eml` in a directory
#[derive(Debug, Clone)]
pub struct QueueDir {
    path: PathBuf,
}

impl QueueDir {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl Hook for QueueDir {
    fn name(&self) -> &str {
        "queue_dir"
    }

    fn registrations(&self) -> &'static [&'static str] {
        &["queue"]
    }

    async fn call(&self, _: Milestone, ctx: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
        let Some(transaction) = ctx.transaction.as_deref() else {
            return Ok(Outcome::DeclineToAct);
        };

        let id = Ulid::new();
        let message = transaction.message()?;

        tokio::fs::create_dir_all(&self.path).await?;

        // Only complete messages ever carry the .eml name
        let partial = self.path.join(format!(".{id}.tmp"));
        let queued = self.path.join(format!("{id}.eml"));
        tokio::fs::write(&partial, &message).await?;
        tokio::fs::rename(&partial, &queued).await?;

        internal!(
            id = ctx.session.id(),
            level = INFO,
            "Queued {} ({} bytes)",
            queued.display(),
            message.len()
        );

        Ok(Outcome::accept_with(format!("Queued as {id}")))
    }
}

#[cfg(test)]
mod test {
    use super::QueueDir;
    use crate::{
        hooks::{Hook, HookContext, Milestone},
        smtp::{session::SessionInfo, transaction::Transaction},
    };

    #[tokio::test]
    async fn writes_message() {
        let directory = tempfile::tempdir().unwrap();
        let queue = QueueDir::new(directory.path().join("queue"));

        let mut session =
            SessionInfo::new("127.0.0.1:25".parse().unwrap(), "192.0.2.1:1".parse().unwrap());
        let mut transaction = Transaction::default();
        transaction.body_write(b"Subject: hi\r\n\r\nbody\r\n").unwrap();
        transaction.prepend_header("Received", "from test");

        let mut ctx = HookContext::new(&mut session).with_transaction(Some(&mut transaction));
        let outcome = queue.call(Milestone::Queue, &mut ctx).await.unwrap();

        let reason = outcome.reason().unwrap();
        let id = reason.strip_prefix("Queued as ").unwrap();

        let path = directory.path().join("queue").join(format!("{id}.eml"));
        assert_eq!(
            std::fs::read(path).unwrap(),
            b"Received: from test\r\nSubject: hi\r\n\r\nbody\r\n"
        );
        assert_eq!(std::fs::read_dir(directory.path().join("queue")).unwrap().count(), 1);
    }
}
