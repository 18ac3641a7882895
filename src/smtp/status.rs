use core::fmt::{self, Display, Formatter};

/// SMTP reply codes used by the server
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    HelpMessage = 214,
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    CannotVerify = 252,
    StartMailInput = 354,
    Unavailable = 421,
    MailboxUnavailable = 450,
    ActionUnavailable = 451,
    InsufficientStorage = 452,
    SyntaxError = 500,
    ParameterSyntaxError = 501,
    InvalidCommandSequence = 503,
    NoMailService = 521,
    Error = 550,
    ExceededStorage = 552,
    TransactionFailed = 554,
    Unknown(u32),
}

impl Status {
    /// Checks if the status is a permanent rejection
    #[must_use]
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&u32::from(self))
    }

    /// The leading digit, which is the class of an extended status code
    #[must_use]
    pub fn class(self) -> u8 {
        u8::try_from(u32::from(self) / 100).unwrap_or(5)
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            214 => Self::HelpMessage,
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            252 => Self::CannotVerify,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            450 => Self::MailboxUnavailable,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            500 => Self::SyntaxError,
            501 => Self::ParameterSyntaxError,
            503 => Self::InvalidCommandSequence,
            521 => Self::NoMailService,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            554 => Self::TransactionFailed,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::HelpMessage => 214,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::CannotVerify => 252,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::MailboxUnavailable => 450,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::SyntaxError => 500,
            Status::ParameterSyntaxError => 501,
            Status::InvalidCommandSequence => 503,
            Status::NoMailService => 521,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::TransactionFailed => 554,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}
