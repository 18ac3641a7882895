use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use crate::error::RegistryError;

/// The points in a connection at which hooks are consulted
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Milestone {
    PreConnection,
    Connect,
    PostConnection,
    Greeting,
    Helo,
    Ehlo,
    ResetTransaction,
    MailPre,
    Mail,
    RcptPre,
    Rcpt,
    Data,
    DataPost,
    QueuePre,
    Queue,
    QueuePost,
    Quit,
    Disconnect,
    Unknown,
    Vrfy,
}

impl Milestone {
    pub const ALL: [Self; 20] = [
        Self::PreConnection,
        Self::Connect,
        Self::PostConnection,
        Self::Greeting,
        Self::Helo,
        Self::Ehlo,
        Self::ResetTransaction,
        Self::MailPre,
        Self::Mail,
        Self::RcptPre,
        Self::Rcpt,
        Self::Data,
        Self::DataPost,
        Self::QueuePre,
        Self::Queue,
        Self::QueuePost,
        Self::Quit,
        Self::Disconnect,
        Self::Unknown,
        Self::Vrfy,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PreConnection => "pre_connection",
            Self::Connect => "connect",
            Self::PostConnection => "post_connection",
            Self::Greeting => "greeting",
            Self::Helo => "helo",
            Self::Ehlo => "ehlo",
            Self::ResetTransaction => "reset_transaction",
            Self::MailPre => "mail_pre",
            Self::Mail => "mail",
            Self::RcptPre => "rcpt_pre",
            Self::Rcpt => "rcpt",
            Self::Data => "data",
            Self::DataPost => "data_post",
            Self::QueuePre => "queue_pre",
            Self::Queue => "queue",
            Self::QueuePost => "queue_post",
            Self::Quit => "quit",
            Self::Disconnect => "disconnect",
            Self::Unknown => "unknown",
            Self::Vrfy => "vrfy",
        }
    }
}

impl Display for Milestone {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Milestone {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|milestone| milestone.name() == name)
            .ok_or_else(|| RegistryError::UnknownMilestone(name.to_string()))
    }
}
