use tokio::io::{AsyncRead, AsyncWrite};

use super::{DenyCodes, Flow, Session};
use crate::{
    config::QueueDecline,
    error::SessionError,
    hooks::{Milestone, Outcome, Severity},
    internal,
    smtp::{connection::Line, status::Status},
};

/// Longest chunk read from a single line of message data
const MAX_DATA_LINE: usize = 64 * 1024;

const DATA_DENY: DenyCodes = DenyCodes::new(
    Status::ActionUnavailable,
    Status::TransactionFailed,
    Status::Unavailable,
    Status::TransactionFailed,
);

const MESSAGE_DENY: DenyCodes = DenyCodes::new(
    Status::InsufficientStorage,
    Status::ExceededStorage,
    Status::Unavailable,
    Status::ExceededStorage,
);

/// How the message transfer ended
#[derive(Debug, PartialEq, Eq)]
enum Body {
    Complete,
    TooBig,
    BareLineEnding,
    Eof,
}

fn denial_text(outcome: &Outcome) -> &'static str {
    match outcome.severity() {
        Some(Severity::Soft) => "Message denied temporarily",
        _ => "Message denied",
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub(super) async fn data(&mut self) -> Result<Flow, SessionError> {
        let (sender, recipients) = self.transaction.as_ref().map_or((false, false), |transaction| {
            (
                transaction.sender().is_some(),
                !transaction.recipients().is_empty(),
            )
        });

        if !sender {
            self.reply(Status::InvalidCommandSequence, "MAIL first please")
                .await?;
            return Ok(Flow::Continue);
        }

        if !recipients {
            self.reply(Status::InvalidCommandSequence, "RCPT first please")
                .await?;
            return Ok(Flow::Continue);
        }

        let outcome = self.dispatch(Milestone::Data).await?;
        if outcome.is_done() {
            return Ok(Flow::Continue);
        }
        if outcome.severity().is_some() {
            return self.deny(&outcome, DATA_DENY, denial_text(&outcome)).await;
        }

        self.reply(Status::StartMailInput, "go ahead").await?;

        match self.receive_body().await? {
            Body::Complete => {}
            Body::TooBig => {
                self.reset_transaction().await?;
                self.reply(Status::ExceededStorage, "Message too big!").await?;
                return Ok(Flow::Continue);
            }
            Body::BareLineEnding => {
                self.reset_transaction().await?;
                self.reply(
                    Status::Unavailable,
                    "See http://smtpd.develooper.com/barelf.html",
                )
                .await?;
                return Err(SessionError::Protocol(
                    "bare line ending in message terminator".to_string(),
                ));
            }
            Body::Eof => {
                internal!(
                    id = self.info.id(),
                    level = DEBUG,
                    "Client disconnected during DATA"
                );
                self.reset_transaction().await?;
                return Ok(Flow::Close);
            }
        }

        self.add_received();

        let outcome = self.dispatch(Milestone::DataPost).await?;
        if outcome.is_done() {
            self.reset_transaction().await?;
            return Ok(Flow::Continue);
        }
        if outcome.severity().is_some() {
            let flow = self.deny(&outcome, MESSAGE_DENY, denial_text(&outcome)).await?;
            self.reset_transaction().await?;
            return Ok(flow);
        }

        self.queue().await
    }

    /// Read message lines into the transaction until the lone '.'
    async fn receive_body(&mut self) -> Result<Body, SessionError> {
        let limit = self.config.size_limit as u64;
        let timeout = self.config.timeouts.data();

        let Some(transaction) = self.transaction.as_mut() else {
            return Ok(Body::Eof);
        };

        let mut size = 0_u64;
        let mut in_headers = true;
        let mut line_start = true;
        let mut too_big = false;

        loop {
            let line = match tokio::time::timeout(timeout, self.connection.receive(MAX_DATA_LINE)).await {
                Ok(line) => line?,
                Err(_) => {
                    internal!(
                        id = self.info.id(),
                        level = WARN,
                        "Client stalled for {} seconds during DATA",
                        self.config.timeouts.data_secs
                    );
                    return Err(SessionError::Timeout(self.config.timeouts.data_secs));
                }
            };

            let (bytes, complete) = match line {
                Line::Complete(bytes) => (bytes, true),
                Line::Truncated(bytes) => (bytes, false),
                Line::Eof(_) => return Ok(Body::Eof),
            };

            if line_start {
                match bytes.as_slice() {
                    b".\r\n" => {
                        return Ok(if too_big { Body::TooBig } else { Body::Complete });
                    }
                    b".\n" | b".\r" => return Ok(Body::BareLineEnding),
                    _ => {}
                }
            }

            size += bytes.len() as u64;
            if limit > 0 && size > limit {
                too_big = true;
            }

            if !too_big {
                let separator =
                    in_headers && line_start && matches!(bytes.as_slice(), b"\r\n" | b"\n");

                let unstuffed = if line_start && bytes.starts_with(b"..") {
                    &bytes[1..]
                } else {
                    &bytes[..]
                };
                transaction.body_write(unstuffed)?;

                if separator {
                    in_headers = false;
                    transaction.end_headers()?;
                }
            }

            line_start = complete;
        }
    }

    fn add_received(&mut self) {
        let ip = self.info.remote_ip();
        let value = format!(
            "from {ip} (HELO {}) ([{ip}])\r\n\tby {} (waymark/{}) with {} id {}; {}",
            self.info.helo,
            self.config.hostname,
            env!("CARGO_PKG_VERSION"),
            self.info.greeting.protocol(),
            self.info.id(),
            chrono::Utc::now().to_rfc2822(),
        );

        if let Some(transaction) = self.transaction.as_mut() {
            transaction.prepend_header("Received", &value);
        }
    }

    /// `queue_pre`, `queue` and `queue_post`; the transaction is always
    /// reset afterwards
    async fn queue(&mut self) -> Result<Flow, SessionError> {
        let outcome = self.dispatch(Milestone::QueuePre).await?;
        if outcome.is_done() {
            self.reset_transaction().await?;
            return Ok(Flow::Continue);
        }

        let outcome = self.dispatch(Milestone::Queue).await?;
        let flow = match outcome {
            Outcome::ShortCircuitDone(_) => Flow::Continue,
            Outcome::Accept(_) | Outcome::ShortCircuitOk(_) => {
                if let Some(transaction) = &self.transaction {
                    internal!(
                        id = self.info.id(),
                        level = INFO,
                        "Queued message of {} bytes for {} recipient(s)",
                        transaction.data_size(),
                        transaction.recipients().len()
                    );
                }

                self.reply(
                    outcome.code().unwrap_or(Status::Ok),
                    outcome.reason().unwrap_or("Queued"),
                )
                .await?;

                let post = self.dispatch(Milestone::QueuePost).await?;
                if post.is_decisive() {
                    internal!(
                        id = self.info.id(),
                        level = DEBUG,
                        "queue_post outcome ignored: {post:?}"
                    );
                }
                Flow::Continue
            }
            Outcome::DeclineToAct => self.queue_declined().await?,
            _ => self.deny(&outcome, MESSAGE_DENY, denial_text(&outcome)).await?,
        };

        self.reset_transaction().await?;
        Ok(flow)
    }

    async fn queue_declined(&mut self) -> Result<Flow, SessionError> {
        const TEXT: &str = "Queuing declined or disabled; try again later";

        match self.config.queue_decline {
            QueueDecline::Temporary => {
                internal!(id = self.info.id(), level = WARN, "No handler queued the message");
                self.reply(Status::ActionUnavailable, TEXT).await?;
                Ok(Flow::Continue)
            }
            QueueDecline::Fatal => {
                internal!(id = self.info.id(), level = ERROR, "No handler queued the message");
                self.reply(Status::Unavailable, TEXT).await?;
                Ok(Flow::Close)
            }
        }
    }
}
