use crate::smtp::{
    address::Address, command::Params, response::Reply, session::SessionInfo,
    transaction::Transaction,
};

/// Everything a hook may read or change at a milestone.
///
/// Which optional parts are present depends on the milestone:
///
/// | milestone | transaction | address | params | argument | rest |
/// |---|---|---|---|---|---|
/// | `helo`, `ehlo` | | | | peer name | |
/// | `reset_transaction` | the discarded one | | | | |
/// | `mail_pre`, `mail` | yes | sender | yes | | |
/// | `rcpt_pre`, `rcpt` | yes | recipient | yes | | |
/// | `data` .. `queue_post` | yes | | | | |
/// | `unknown` | if any | | | verb | remainder |
/// | `vrfy` | if any | | | | argument |
///
/// `mail_pre` and `rcpt_pre` may rewrite the address in place.
pub struct HookContext<'a> {
    pub session: &'a mut SessionInfo,
    pub transaction: Option<&'a mut Transaction>,
    pub address: Option<&'a mut Address>,
    pub params: Option<&'a Params>,
    pub argument: Option<&'a str>,
    pub rest: Option<&'a str>,
    replies: Vec<Reply>,
}

impl<'a> HookContext<'a> {
    pub fn new(session: &'a mut SessionInfo) -> Self {
        Self {
            session,
            transaction: None,
            address: None,
            params: None,
            argument: None,
            rest: None,
            replies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction: Option<&'a mut Transaction>) -> Self {
        self.transaction = transaction;
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: &'a mut Address) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: &'a Params) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn with_argument(mut self, argument: &'a str) -> Self {
        self.argument = Some(argument);
        self
    }

    #[must_use]
    pub fn with_rest(mut self, rest: &'a str) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Queue a reply to be written before the server's own response.
    /// Hooks that answer [`super::Outcome::ShortCircuitDone`] use this to
    /// speak for the server.
    pub fn respond(&mut self, reply: Reply) {
        self.replies.push(reply);
    }

    pub fn into_replies(self) -> Vec<Reply> {
        self.replies
    }
}
