use tokio::io::{AsyncRead, AsyncWrite};

use super::{DenyCodes, Flow, Greeting, Session};
use crate::{
    error::SessionError,
    hooks::{HookContext, Milestone, Outcome},
    internal,
    smtp::{
        command::{self, PathArguments},
        status::Status,
    },
};

const HELO_DENY: DenyCodes = DenyCodes::new(
    Status::MailboxUnavailable,
    Status::Error,
    Status::Unavailable,
    Status::Error,
);

const ENVELOPE_DENY: DenyCodes = DenyCodes::new(
    Status::MailboxUnavailable,
    Status::Error,
    Status::Unavailable,
    Status::Error,
);

const VRFY_DENY: DenyCodes = DenyCodes::new(
    Status::MailboxUnavailable,
    Status::TransactionFailed,
    Status::Unavailable,
    Status::TransactionFailed,
);

const UNKNOWN_DENY: DenyCodes = DenyCodes::new(
    Status::MailboxUnavailable,
    Status::SyntaxError,
    Status::Unavailable,
    Status::NoMailService,
);

/// Fold one stage of a staged milestone into the running outcome. The next
/// stage only runs while every earlier one declined or accepted; a later
/// decline keeps an earlier accept.
fn proceed(outcome: &mut Outcome, stage: Outcome) -> bool {
    if !stage.is_decisive() {
        return true;
    }

    let accepted = matches!(stage, Outcome::Accept(_));
    *outcome = stage;
    accepted
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    pub(super) async fn helo(&mut self, argument: &str, greeting: Greeting) -> Result<Flow, SessionError> {
        if !self.info.greeting.is_none() {
            self.reply(Status::InvalidCommandSequence, "But you already said HELO...")
                .await?;
            return Ok(Flow::Continue);
        }

        if argument.is_empty() {
            self.reply(
                Status::ParameterSyntaxError,
                format!("Syntax: {greeting} hostname"),
            )
            .await?;
            return Ok(Flow::Continue);
        }

        let milestone = match greeting {
            Greeting::Extended => Milestone::Ehlo,
            Greeting::Basic | Greeting::None => Milestone::Helo,
        };

        let mut ctx = HookContext::new(&mut self.info).with_argument(argument);
        let outcome = self.registry.dispatch(milestone, &mut ctx).await;
        let replies = ctx.into_replies();
        let outcome = self.settle(outcome, replies).await?;

        if outcome.is_done() {
            return Ok(Flow::Continue);
        }

        if outcome.severity().is_some() {
            return self.deny(&outcome, HELO_DENY, "Access denied").await;
        }

        self.info.greeting = greeting;
        self.info.helo = argument.to_string();

        let remote = self.info.remote_ip();
        let mut text = format!(
            "{} Hi {remote} [{remote}]; I am so happy to meet you.",
            self.config.hostname
        );
        if greeting == Greeting::Extended && self.config.size_limit > 0 {
            text.push_str(&format!("\nSIZE {}", self.config.size_limit));
        }

        self.reply(Status::Ok, text).await?;
        Ok(Flow::Continue)
    }

    pub(super) async fn mail(&mut self, rest: &str) -> Result<Flow, SessionError> {
        if self.info.greeting.is_none() {
            self.reply(
                Status::InvalidCommandSequence,
                "Manners? You haven't said hello...",
            )
            .await?;
            return Ok(Flow::Continue);
        }

        self.reset_transaction().await?;

        let PathArguments {
            mut address,
            params,
        } = match command::parse_mail(rest) {
            Ok(arguments) => arguments,
            Err(err) => {
                internal!(id = self.info.id(), level = DEBUG, "Bad MAIL '{rest}': {err}");
                self.reply(Status::ParameterSyntaxError, "Syntax error in command")
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        let declared = params
            .get("size")
            .and_then(|size| size.parse::<u64>().ok())
            .unwrap_or(0);
        if self.info.greeting == Greeting::Extended
            && self.config.size_limit > 0
            && declared > self.config.size_limit as u64
        {
            self.reply(Status::ExceededStorage, "Message too big!").await?;
            return Ok(Flow::Continue);
        }

        let mut transaction = self.new_transaction();
        let mut outcome = Outcome::DeclineToAct;

        for milestone in [Milestone::MailPre, Milestone::Mail] {
            let mut ctx = HookContext::new(&mut self.info)
                .with_transaction(Some(&mut transaction))
                .with_address(&mut address)
                .with_params(&params);
            let result = self.registry.dispatch(milestone, &mut ctx).await;
            let replies = ctx.into_replies();
            let stage = self.settle(result, replies).await?;
            if !proceed(&mut outcome, stage) {
                break;
            }
        }

        if outcome.is_done() {
            return Ok(Flow::Continue);
        }

        if outcome.severity().is_some() {
            return self.deny(&outcome, ENVELOPE_DENY, "Sender denied").await;
        }

        let text = match outcome.reason() {
            Some(reason) if outcome.is_accept() => reason.to_string(),
            _ => format!(
                "{} sender OK - how exciting to get mail from you!",
                address.path()
            ),
        };

        if let Err(address) = transaction.set_sender(address, params) {
            internal!(
                id = self.info.id(),
                level = WARN,
                "Fresh transaction already had a sender, ignoring {address}"
            );
        }
        self.transaction = Some(transaction);

        self.reply(Status::Ok, text).await?;
        Ok(Flow::Continue)
    }

    pub(super) async fn rcpt(&mut self, rest: &str) -> Result<Flow, SessionError> {
        if self
            .transaction
            .as_ref()
            .and_then(|transaction| transaction.sender())
            .is_none()
        {
            self.reply(Status::InvalidCommandSequence, "Use MAIL before RCPT")
                .await?;
            return Ok(Flow::Continue);
        }

        let PathArguments {
            mut address,
            params,
        } = match command::parse_rcpt(rest) {
            Ok(arguments) => arguments,
            Err(err) => {
                internal!(id = self.info.id(), level = DEBUG, "Bad RCPT '{rest}': {err}");
                self.reply(Status::ParameterSyntaxError, "Syntax error in command")
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        let mut outcome = Outcome::DeclineToAct;
        for milestone in [Milestone::RcptPre, Milestone::Rcpt] {
            let mut ctx = HookContext::new(&mut self.info)
                .with_transaction(self.transaction.as_mut())
                .with_address(&mut address)
                .with_params(&params);
            let result = self.registry.dispatch(milestone, &mut ctx).await;
            let replies = ctx.into_replies();
            let stage = self.settle(result, replies).await?;
            if !proceed(&mut outcome, stage) {
                break;
            }
        }

        match outcome {
            Outcome::ShortCircuitDone(_) => Ok(Flow::Continue),
            Outcome::DeclineToAct => {
                self.reply(
                    Status::MailboxUnavailable,
                    "No plugin decided if relaying is allowed",
                )
                .await?;
                Ok(Flow::Continue)
            }
            Outcome::Accept(_) | Outcome::ShortCircuitOk(_) => {
                let text = outcome
                    .reason()
                    .map_or_else(|| format!("{}, recipient ok", address.path()), str::to_string);

                if let Some(transaction) = self.transaction.as_mut() {
                    if let Err(err) = transaction.add_recipient(address) {
                        internal!(id = self.info.id(), level = WARN, "Recipient dropped: {err}");
                    }
                }

                self.reply(outcome.code().unwrap_or(Status::Ok), text).await?;
                Ok(Flow::Continue)
            }
            _ => self.deny(&outcome, ENVELOPE_DENY, "relaying denied").await,
        }
    }

    pub(super) async fn rset(&mut self) -> Result<Flow, SessionError> {
        self.reset_transaction().await?;
        self.reply(Status::Ok, "OK").await?;
        Ok(Flow::Continue)
    }

    pub(super) async fn vrfy(&mut self, rest: &str) -> Result<Flow, SessionError> {
        let mut ctx = HookContext::new(&mut self.info)
            .with_transaction(self.transaction.as_mut())
            .with_rest(rest);
        let result = self.registry.dispatch(Milestone::Vrfy, &mut ctx).await;
        let replies = ctx.into_replies();
        let outcome = self.settle(result, replies).await?;

        match outcome {
            Outcome::ShortCircuitDone(_) => Ok(Flow::Continue),
            Outcome::DeclineToAct => {
                self.reply(
                    Status::CannotVerify,
                    "Just try sending a mail and we'll see how it turns out...",
                )
                .await?;
                Ok(Flow::Continue)
            }
            Outcome::Accept(_) | Outcome::ShortCircuitOk(_) => {
                self.reply(
                    outcome.code().unwrap_or(Status::Ok),
                    outcome.reason().unwrap_or("User OK"),
                )
                .await?;
                Ok(Flow::Continue)
            }
            _ => {
                self.reset_transaction().await?;
                self.deny(&outcome, VRFY_DENY, "Access Denied").await
            }
        }
    }

    pub(super) async fn quit(&mut self) -> Result<Flow, SessionError> {
        let outcome = self.dispatch(Milestone::Quit).await?;

        if !outcome.is_done() {
            let text = match outcome.reason() {
                Some(reason) => reason.to_string(),
                None => format!(
                    "{} closing connection. Have a wonderful day.",
                    self.config.hostname
                ),
            };
            self.reply(outcome.code().unwrap_or(Status::GoodBye), text)
                .await?;
        }

        Ok(Flow::Close)
    }

    /// A verb the server does not implement. Hooks may still claim it; every
    /// one nobody claims counts towards the disconnect threshold.
    pub(super) async fn unknown(&mut self, verb: &str, rest: &str) -> Result<Flow, SessionError> {
        let mut ctx = HookContext::new(&mut self.info)
            .with_transaction(self.transaction.as_mut())
            .with_argument(verb)
            .with_rest(rest);
        let result = self.registry.dispatch(Milestone::Unknown, &mut ctx).await;
        let replies = ctx.into_replies();
        let outcome = self.settle(result, replies).await?;

        if outcome.is_done() {
            self.unrecognized = 0;
            return Ok(Flow::Continue);
        }

        if outcome.is_accept() {
            self.unrecognized = 0;
            self.reply(
                outcome.code().unwrap_or(Status::Ok),
                outcome.reason().unwrap_or("OK"),
            )
            .await?;
            return Ok(Flow::Continue);
        }

        if outcome.disconnects() {
            return self.deny(&outcome, UNKNOWN_DENY, "Unrecognized command").await;
        }

        self.unrecognized += 1;
        internal!(
            id = self.info.id(),
            level = DEBUG,
            "Unrecognized command '{verb}' ({} in a row)",
            self.unrecognized
        );

        let limit = self.config.max_unrecognized;
        if limit > 0 && self.unrecognized >= limit {
            self.reply(
                Status::NoMailService,
                format!(
                    "Closing connection. {} unrecognized commands. Perhaps you should read RFC 2821?",
                    self.unrecognized
                ),
            )
            .await?;
            return Ok(Flow::Close);
        }

        match outcome {
            Outcome::DeclineToAct => {
                self.reply(Status::SyntaxError, "Unrecognized command").await?;
                Ok(Flow::Continue)
            }
            _ => self.deny(&outcome, UNKNOWN_DENY, "Unrecognized command").await,
        }
    }
}
