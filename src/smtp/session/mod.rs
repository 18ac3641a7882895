use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast,
};

use crate::{
    config::{Config, QueueDecline, SpoolConfig, Timeouts},
    error::{DispatchError, SessionError},
    hooks::{HookContext, Milestone, Outcome, Registry, Severity},
    incoming, internal, outgoing,
    smtp::{
        command::{Command, Verb},
        connection::{Connection, Line},
        response::Reply,
        spool::Spool,
        status::Status,
        transaction::Transaction,
    },
    Signal,
};

mod commands;
mod data;
mod info;

pub use self::info::{Greeting, SessionInfo};

/// Longest command line accepted, CRLF included
const MAX_COMMAND_LINE: usize = 4096;

/// Whether the session keeps reading after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Reply codes for the four denial outcomes at one point in the dialogue
#[derive(Debug, Clone, Copy)]
pub(crate) struct DenyCodes {
    soft: Status,
    hard: Status,
    soft_disconnect: Status,
    hard_disconnect: Status,
}

impl DenyCodes {
    const fn new(soft: Status, hard: Status, soft_disconnect: Status, hard_disconnect: Status) -> Self {
        Self {
            soft,
            hard,
            soft_disconnect,
            hard_disconnect,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hostname: String,
    /// Largest message in bytes, 0 for no limit
    pub size_limit: usize,
    /// Consecutive unrecognised commands before disconnecting, 0 for no limit
    pub max_unrecognized: usize,
    pub queue_decline: QueueDecline,
    pub timeouts: Timeouts,
    pub spool: SpoolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self::builder()
            .with_hostname(config.hostname.clone())
            .with_size_limit(config.size_limit)
            .with_max_unrecognized(config.max_unrecognized_commands)
            .with_queue_decline(config.queue_decline)
            .with_timeouts(config.timeouts.clone())
            .with_spool(config.spool.clone())
            .build()
    }
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    fn spool(&self) -> Spool {
        Spool::new(self.spool.rollover_bytes).with_directory(self.spool.directory.clone())
    }
}

/// Builder for `SessionConfig`
#[derive(Debug)]
pub struct SessionConfigBuilder {
    hostname: String,
    size_limit: usize,
    max_unrecognized: usize,
    queue_decline: QueueDecline,
    timeouts: Timeouts,
    spool: SpoolConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let config = Config::default();

        Self {
            hostname: config.hostname,
            size_limit: config.size_limit,
            max_unrecognized: config.max_unrecognized_commands,
            queue_decline: config.queue_decline,
            timeouts: config.timeouts,
            spool: config.spool,
        }
    }
}

impl SessionConfigBuilder {
    /// Set the name the server uses for itself
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    #[must_use]
    pub fn with_max_unrecognized(mut self, max_unrecognized: usize) -> Self {
        self.max_unrecognized = max_unrecognized;
        self
    }

    #[must_use]
    pub fn with_queue_decline(mut self, queue_decline: QueueDecline) -> Self {
        self.queue_decline = queue_decline;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_spool(mut self, spool: SpoolConfig) -> Self {
        self.spool = spool;
        self
    }

    /// Shorthand for a spool in `directory` with the given rollover
    #[must_use]
    pub fn with_spool_directory(mut self, rollover_bytes: usize, directory: Option<PathBuf>) -> Self {
        self.spool = SpoolConfig {
            rollover_bytes,
            directory,
        };
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            hostname: self.hostname,
            size_limit: self.size_limit,
            max_unrecognized: self.max_unrecognized,
            queue_decline: self.queue_decline,
            timeouts: self.timeouts,
            spool: self.spool,
        }
    }
}

/// One client connection, from greeting to close
pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    info: SessionInfo,
    connection: Connection<Stream>,
    registry: Arc<Registry>,
    config: Arc<SessionConfig>,
    transaction: Option<Transaction>,
    unrecognized: usize,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub fn create(
        stream: Stream,
        local: SocketAddr,
        peer: SocketAddr,
        registry: Arc<Registry>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            info: SessionInfo::new(local, peer),
            connection: Connection::new(stream),
            registry,
            config,
            transaction: None,
            unrecognized: 0,
        }
    }

    #[must_use]
    pub const fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Drive the connection until either side closes it.
    ///
    /// # Errors
    /// The reason the session ended early. The client has already been told
    /// where that is possible.
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!(
            id = self.info.id(),
            level = INFO,
            "Connected from {}",
            self.info.remote
        );

        let result = match self.serve(&mut signal).await {
            Err(SessionError::Shutdown) => {
                let text = format!("{} Server shutting down", self.config.hostname);
                self.last_word(Status::Unavailable, &text).await;
                Ok(())
            }
            Err(SessionError::Timeout(secs)) => {
                self.last_word(
                    Status::Unavailable,
                    "Connection timeout, try talking faster next time.",
                )
                .await;
                Err(SessionError::Timeout(secs))
            }
            Err(err @ (SessionError::Dispatch(_) | SessionError::Spool(_))) => {
                internal!(id = self.info.id(), level = ERROR, "{err}");
                self.last_word(Status::ActionUnavailable, "Internal error - try again later")
                    .await;
                Err(err)
            }
            result => result,
        };

        for milestone in [Milestone::Disconnect, Milestone::PostConnection] {
            if let Err(err) = self.dispatch(milestone).await {
                internal!(id = self.info.id(), level = ERROR, "{err}");
            }
        }

        if let Err(err) = self.connection.shutdown().await {
            internal!(id = self.info.id(), level = DEBUG, "Shutdown failed: {err}");
        }

        internal!(id = self.info.id(), level = INFO, "Connection closed");
        result
    }

    async fn serve(&mut self, signal: &mut broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        if self.connect().await? == Flow::Close {
            return Ok(());
        }

        loop {
            let line = match self.read_command(signal).await? {
                Line::Complete(line) => line,
                Line::Truncated(_) => {
                    if !self.connection.discard_line().await? {
                        return Ok(());
                    }
                    self.reply(Status::SyntaxError, "Line too long").await?;
                    continue;
                }
                Line::Eof(_) => {
                    internal!(id = self.info.id(), level = DEBUG, "Client disconnected");
                    return Ok(());
                }
            };

            if self.handle_line(&line).await? == Flow::Close {
                return Ok(());
            }
        }
    }

    /// Wait for a command line, giving up on shutdown or when the client
    /// has been idle too long
    async fn read_command(
        &mut self,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> Result<Line, SessionError> {
        let idle = self.config.timeouts.idle();

        tokio::select! {
            Ok(Signal::Shutdown) = signal.recv() => {
                internal!(id = self.info.id(), level = DEBUG, "Shutdown requested");
                Err(SessionError::Shutdown)
            }
            result = tokio::time::timeout(idle, self.connection.receive(MAX_COMMAND_LINE)) => {
                let Ok(line) = result else {
                    tracing::warn!(
                        target: "waymark",
                        id = %self.info.id(),
                        idle_secs = self.config.timeouts.idle_secs,
                        "Client timed out"
                    );
                    return Err(SessionError::Timeout(self.config.timeouts.idle_secs));
                };

                Ok(line?)
            }
        }
    }

    async fn handle_line(&mut self, line: &[u8]) -> Result<Flow, SessionError> {
        incoming!(
            id = self.info.id(),
            "{}",
            String::from_utf8_lossy(line).trim_end()
        );

        let Ok(command) = Command::try_from(line) else {
            self.reply(Status::SyntaxError, "Error: bad syntax").await?;
            return Ok(Flow::Continue);
        };

        if !matches!(command.verb, Verb::Unknown(_)) {
            self.unrecognized = 0;
        }

        match command.verb {
            Verb::Helo => self.helo(&command.rest, Greeting::Basic).await,
            Verb::Ehlo => self.helo(&command.rest, Greeting::Extended).await,
            Verb::Mail => self.mail(&command.rest).await,
            Verb::Rcpt => self.rcpt(&command.rest).await,
            Verb::Data => self.data().await,
            Verb::Rset => self.rset().await,
            Verb::Vrfy => self.vrfy(&command.rest).await,
            Verb::Noop => {
                self.reply(Status::Ok, "OK").await?;
                Ok(Flow::Continue)
            }
            Verb::Help => {
                self.reply(Status::HelpMessage, "See RFC 5321").await?;
                Ok(Flow::Continue)
            }
            Verb::Quit => self.quit().await,
            Verb::Unknown(verb) => self.unknown(&verb, &command.rest).await,
        }
    }

    /// `pre_connection`, `connect` and `greeting`, then the banner
    async fn connect(&mut self) -> Result<Flow, SessionError> {
        const CONNECT_DENY: DenyCodes = DenyCodes::new(
            Status::Unavailable,
            Status::TransactionFailed,
            Status::Unavailable,
            Status::TransactionFailed,
        );

        for milestone in [Milestone::PreConnection, Milestone::Connect] {
            let outcome = self.dispatch(milestone).await?;

            if outcome.severity().is_some() {
                let default = match outcome.severity() {
                    Some(Severity::Soft) => "Service temporarily unavailable",
                    _ => "Connection refused",
                };
                self.deny(&outcome, CONNECT_DENY, default).await?;
                return Ok(Flow::Close);
            }

            if outcome.is_done() {
                return Ok(Flow::Continue);
            }
        }

        let outcome = self.dispatch(Milestone::Greeting).await?;
        if outcome.severity().is_some() {
            self.deny(&outcome, CONNECT_DENY, "Connection refused").await?;
            return Ok(Flow::Close);
        }

        if !outcome.is_done() {
            let banner = match outcome.reason() {
                Some(reason) if outcome.is_accept() => reason.to_string(),
                _ => format!("{} ESMTP", self.config.hostname),
            };
            self.reply(Status::ServiceReady, banner).await?;
        }

        Ok(Flow::Continue)
    }

    /// Dispatch `milestone` with the session and any live transaction
    pub(crate) async fn dispatch(&mut self, milestone: Milestone) -> Result<Outcome, SessionError> {
        let mut ctx = HookContext::new(&mut self.info).with_transaction(self.transaction.as_mut());
        let outcome = self.registry.dispatch(milestone, &mut ctx).await;
        let replies = ctx.into_replies();

        self.settle(outcome, replies).await
    }

    /// Write what hooks queued, then surface the dispatch result
    pub(crate) async fn settle(
        &mut self,
        outcome: Result<Outcome, DispatchError>,
        replies: Vec<Reply>,
    ) -> Result<Outcome, SessionError> {
        for reply in &replies {
            self.send(reply).await?;
        }

        Ok(outcome?)
    }

    /// Discard the live transaction, letting hooks see it one last time
    pub(crate) async fn reset_transaction(&mut self) -> Result<(), SessionError> {
        let Some(mut old) = self.transaction.take() else {
            return Ok(());
        };

        let mut ctx = HookContext::new(&mut self.info).with_transaction(Some(&mut old));
        let outcome = self
            .registry
            .dispatch(Milestone::ResetTransaction, &mut ctx)
            .await;
        let replies = ctx.into_replies();

        self.settle(outcome, replies).await?;
        Ok(())
    }

    /// Reply for a denial outcome using `codes`, unless the outcome pins
    /// its own code. Anything else is left to the caller.
    pub(crate) async fn deny(
        &mut self,
        outcome: &Outcome,
        codes: DenyCodes,
        default_reason: &str,
    ) -> Result<Flow, SessionError> {
        let (status, flow) = match outcome {
            Outcome::SoftDeny(_) => (codes.soft, Flow::Continue),
            Outcome::HardDeny(_) => (codes.hard, Flow::Continue),
            Outcome::SoftDenyAndDisconnect(_) => (codes.soft_disconnect, Flow::Close),
            Outcome::HardDenyAndDisconnect(_) => (codes.hard_disconnect, Flow::Close),
            _ => return Ok(Flow::Continue),
        };

        internal!(id = self.info.id(), level = DEBUG, "Denied: {outcome}");
        self.reply(
            outcome.code().unwrap_or(status),
            outcome.reason().unwrap_or(default_reason),
        )
        .await?;

        Ok(flow)
    }

    pub(crate) async fn reply(&mut self, status: Status, text: impl AsRef<str>) -> Result<(), SessionError> {
        self.send(&Reply::new(status, text)).await
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        outgoing!(id = self.info.id(), "{reply}");
        self.connection.send(reply).await?;
        Ok(())
    }

    /// A final reply on a connection that may already be gone
    async fn last_word(&mut self, status: Status, text: &str) {
        if let Err(err) = self.reply(status, text).await {
            internal!(id = self.info.id(), level = DEBUG, "Unable to send final reply: {err}");
        }
    }

    fn new_transaction(&self) -> Transaction {
        Transaction::new(self.config.spool())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf},
        sync::broadcast,
        task::JoinHandle,
    };

    use super::{Session, SessionConfig};
    use crate::{
        config::{QueueDecline, Timeouts},
        error::SessionError,
        hooks::{Hook, HookContext, Milestone, Outcome, Registry},
        smtp::{response::Reply, status::Status},
        Signal,
    };

    /// Answers every milestone it is registered for with the same outcome
    pub(crate) struct Always(pub &'static str, pub Outcome);

    #[async_trait]
    impl Hook for Always {
        fn name(&self) -> &str {
            self.0
        }

        async fn call(&self, _: Milestone, _: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
            Ok(self.1.clone())
        }
    }

    /// The scripted side of a conversation
    pub(crate) struct Client {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        pub(crate) session: JoinHandle<Result<(), SessionError>>,
        pub(crate) shutdown: broadcast::Sender<Signal>,
    }

    impl Client {
        pub(crate) fn start(registry: Registry, config: SessionConfig) -> Self {
            let (client, server) = tokio::io::duplex(1 << 16);
            let (shutdown, signal) = broadcast::channel(1);

            let session = Session::create(
                server,
                "127.0.0.1:25".parse().unwrap(),
                "192.0.2.7:50000".parse().unwrap(),
                Arc::new(registry),
                Arc::new(config),
            );
            let session = tokio::spawn(session.run(signal));

            let (reader, writer) = tokio::io::split(client);
            Self {
                reader: BufReader::new(reader),
                writer,
                session,
                shutdown,
            }
        }

        pub(crate) async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
        }

        /// Close the write half, as a client dropping the connection would
        pub(crate) async fn hang_up(&mut self) {
            self.writer.shutdown().await.unwrap();
        }

        /// One complete reply, continuation lines included
        pub(crate) async fn reply(&mut self) -> String {
            let mut reply = String::new();
            loop {
                let mut line = String::new();
                if self.reader.read_line(&mut line).await.unwrap() == 0 {
                    return reply;
                }

                reply.push_str(&line);
                if line.as_bytes().get(3) != Some(&b'-') {
                    return reply.trim_end().to_string();
                }
            }
        }

        pub(crate) async fn expect(&mut self, prefix: &str) -> String {
            let reply = self.reply().await;
            assert!(reply.starts_with(prefix), "expected '{prefix}', got '{reply}'");
            reply
        }

        pub(crate) async fn command(&mut self, line: &str, prefix: &str) -> String {
            self.send(line).await;
            self.expect(prefix).await
        }

        /// Read until the server closes the stream
        pub(crate) async fn closed(&mut self) -> bool {
            let mut rest = String::new();
            self.reader.read_line(&mut rest).await.unwrap() == 0
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::builder()
            .with_hostname("mx.test")
            .with_timeouts(Timeouts {
                idle_secs: 5,
                data_secs: 5,
            })
            .build()
    }

    #[tokio::test]
    async fn greeting_and_quit() {
        let mut client = Client::start(Registry::new(), config());

        client.expect("220 mx.test ESMTP").await;
        client.command("NOOP", "250 OK").await;
        client.command("HELP", "214 See RFC 5321").await;
        client
            .command("QUIT", "221 mx.test closing connection. Have a wonderful day.")
            .await;

        assert!(client.closed().await);
        assert!(client.session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn empty_line() {
        let mut client = Client::start(Registry::new(), config());
        client.expect("220").await;
        client.command("", "500 Error: bad syntax").await;
        client.command("   ", "500 Error: bad syntax").await;
    }

    #[tokio::test]
    async fn connect_denied() {
        let mut registry = Registry::new();
        registry
            .register("connect", Arc::new(Always("block", Outcome::hard_deny("Go away"))))
            .unwrap();

        let mut client = Client::start(registry, config());
        client.expect("554 Go away").await;
        assert!(client.closed().await);

        let mut registry = Registry::new();
        registry
            .register(
                "pre_connection",
                Arc::new(Always("busy", Outcome::SoftDeny(Default::default()))),
            )
            .unwrap();

        let mut client = Client::start(registry, config());
        client.expect("421 Service temporarily unavailable").await;
        assert!(client.closed().await);
    }

    #[tokio::test]
    async fn greeting_text_from_hook() {
        let mut registry = Registry::new();
        registry
            .register(
                "greeting",
                Arc::new(Always("banner", Outcome::accept_with("mx.test Welcome, friend"))),
            )
            .unwrap();

        let mut client = Client::start(registry, config());
        client.expect("220 mx.test Welcome, friend").await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout() {
        let mut client = Client::start(Registry::new(), config());
        client.expect("220").await;

        tokio::time::advance(Duration::from_secs(6)).await;
        client
            .expect("421 Connection timeout, try talking faster next time.")
            .await;
        assert!(client.closed().await);
        assert!(matches!(
            client.session.await.unwrap(),
            Err(SessionError::Timeout(5))
        ));
    }

    #[tokio::test]
    async fn shutdown_signal() {
        let mut client = Client::start(Registry::new(), config());
        client.expect("220").await;

        client.shutdown.send(Signal::Shutdown).unwrap();
        client.expect("421 mx.test Server shutting down").await;
        assert!(client.closed().await);
        assert!(client.session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn hook_fault_is_temporary() {
        struct Broken;

        #[async_trait]
        impl Hook for Broken {
            fn name(&self) -> &str {
                "broken"
            }

            async fn call(&self, _: Milestone, _: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
                anyhow::bail!("database unavailable")
            }
        }

        let mut registry = Registry::new();
        registry.register("helo", Arc::new(Broken)).unwrap();

        let mut client = Client::start(registry, config());
        client.expect("220").await;
        client
            .command("HELO client.test", "451 Internal error - try again later")
            .await;
        assert!(client.closed().await);
        assert!(matches!(
            client.session.await.unwrap(),
            Err(SessionError::Dispatch(_))
        ));
    }

    #[tokio::test]
    async fn hooks_can_reply_themselves() {
        struct Custom;

        #[async_trait]
        impl Hook for Custom {
            fn name(&self) -> &str {
                "custom"
            }

            async fn call(&self, _: Milestone, ctx: &mut HookContext<'_>) -> anyhow::Result<Outcome> {
                ctx.respond(Reply::new(Status::Ok, "custom hello\nwith continuation"));
                Ok(Outcome::done())
            }
        }

        let mut registry = Registry::new();
        registry.register("helo", Arc::new(Custom)).unwrap();

        let mut client = Client::start(registry, config());
        client.expect("220").await;
        let reply = client.command("HELO client.test", "250-custom hello").await;
        assert!(reply.ends_with("250 with continuation"));

        // Done does not record the greeting
        client
            .command("MAIL FROM:<a@b.c>", "503 Manners? You haven't said hello...")
            .await;
    }

    #[tokio::test]
    async fn builder_from_config() {
        let config = crate::config::Config {
            hostname: "built.test".to_string(),
            size_limit: 99,
            queue_decline: QueueDecline::Fatal,
            ..Default::default()
        };

        let session = SessionConfig::from(&config);
        assert_eq!(session.hostname, "built.test");
        assert_eq!(session.size_limit, 99);
        assert_eq!(session.max_unrecognized, 4);
        assert_eq!(session.queue_decline, QueueDecline::Fatal);
    }
}
