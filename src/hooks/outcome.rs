use core::fmt::{self, Display, Formatter};

use crate::smtp::status::Status;

/// Whether a denial is worth retrying
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// 4xx, retry later
    Soft,
    /// 5xx, do not retry
    Hard,
}

/// Optional reply text and code carried by a decisive outcome
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Detail {
    pub reason: Option<String>,
    /// Replaces the code the command would otherwise pick
    pub code: Option<Status>,
}

impl Detail {
    fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            code: None,
        }
    }
}

/// The answer a hook, or a command handler, gives at a milestone.
///
/// Every variant except [`Outcome::DeclineToAct`] is decisive and stops
/// dispatch at the hook that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Outcome {
    Accept(Detail),
    #[default]
    DeclineToAct,
    SoftDeny(Detail),
    HardDeny(Detail),
    SoftDenyAndDisconnect(Detail),
    HardDenyAndDisconnect(Detail),
    /// Success, skipping whatever hooks remain
    ShortCircuitOk(Detail),
    /// The hook already produced the reply; nothing more is sent
    ShortCircuitDone(Detail),
}

impl Outcome {
    #[must_use]
    pub fn accept() -> Self {
        Self::Accept(Detail::default())
    }

    #[must_use]
    pub fn accept_with(reason: impl Into<String>) -> Self {
        Self::Accept(Detail::reason(reason))
    }

    #[must_use]
    pub fn soft_deny(reason: impl Into<String>) -> Self {
        Self::SoftDeny(Detail::reason(reason))
    }

    #[must_use]
    pub fn hard_deny(reason: impl Into<String>) -> Self {
        Self::HardDeny(Detail::reason(reason))
    }

    #[must_use]
    pub fn soft_deny_disconnect(reason: impl Into<String>) -> Self {
        Self::SoftDenyAndDisconnect(Detail::reason(reason))
    }

    #[must_use]
    pub fn hard_deny_disconnect(reason: impl Into<String>) -> Self {
        Self::HardDenyAndDisconnect(Detail::reason(reason))
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::ShortCircuitOk(Detail::default())
    }

    #[must_use]
    pub fn done() -> Self {
        Self::ShortCircuitDone(Detail::default())
    }

    /// Build a denial from its two facets
    #[must_use]
    pub fn deny(severity: Severity, disconnect: bool, reason: Option<String>) -> Self {
        let detail = Detail { reason, code: None };

        match (severity, disconnect) {
            (Severity::Soft, false) => Self::SoftDeny(detail),
            (Severity::Hard, false) => Self::HardDeny(detail),
            (Severity::Soft, true) => Self::SoftDenyAndDisconnect(detail),
            (Severity::Hard, true) => Self::HardDenyAndDisconnect(detail),
        }
    }

    /// Pin the reply code. Has no effect on [`Outcome::DeclineToAct`].
    #[must_use]
    pub fn with_code(mut self, status: Status) -> Self {
        if let Some(detail) = self.detail_mut() {
            detail.code = Some(status);
        }
        self
    }

    #[must_use]
    pub const fn detail(&self) -> Option<&Detail> {
        match self {
            Self::DeclineToAct => None,
            Self::Accept(detail)
            | Self::SoftDeny(detail)
            | Self::HardDeny(detail)
            | Self::SoftDenyAndDisconnect(detail)
            | Self::HardDenyAndDisconnect(detail)
            | Self::ShortCircuitOk(detail)
            | Self::ShortCircuitDone(detail) => Some(detail),
        }
    }

    fn detail_mut(&mut self) -> Option<&mut Detail> {
        match self {
            Self::DeclineToAct => None,
            Self::Accept(detail)
            | Self::SoftDeny(detail)
            | Self::HardDeny(detail)
            | Self::SoftDenyAndDisconnect(detail)
            | Self::HardDenyAndDisconnect(detail)
            | Self::ShortCircuitOk(detail)
            | Self::ShortCircuitDone(detail) => Some(detail),
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.detail().and_then(|detail| detail.reason.as_deref())
    }

    #[must_use]
    pub fn code(&self) -> Option<Status> {
        self.detail().and_then(|detail| detail.code)
    }

    /// `Some` for the four denial variants
    #[must_use]
    pub const fn severity(&self) -> Option<Severity> {
        match self {
            Self::SoftDeny(_) | Self::SoftDenyAndDisconnect(_) => Some(Severity::Soft),
            Self::HardDeny(_) | Self::HardDenyAndDisconnect(_) => Some(Severity::Hard),
            _ => None,
        }
    }

    #[must_use]
    pub const fn disconnects(&self) -> bool {
        matches!(
            self,
            Self::SoftDenyAndDisconnect(_) | Self::HardDenyAndDisconnect(_)
        )
    }

    #[must_use]
    pub const fn is_decisive(&self) -> bool {
        !matches!(self, Self::DeclineToAct)
    }

    /// Accept or short-circuit success
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_) | Self::ShortCircuitOk(_))
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::ShortCircuitDone(_))
    }

    /// The reply code for this outcome when no command picks a more
    /// specific one. `None` means no reply is produced from the outcome.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        if let Some(code) = self.code() {
            return Some(code);
        }

        match self {
            Self::Accept(_) | Self::ShortCircuitOk(_) => Some(Status::Ok),
            Self::SoftDeny(_) => Some(Status::ActionUnavailable),
            Self::HardDeny(_) => Some(Status::Error),
            Self::SoftDenyAndDisconnect(_) => Some(Status::Unavailable),
            Self::HardDenyAndDisconnect(_) => Some(Status::NoMailService),
            Self::DeclineToAct | Self::ShortCircuitDone(_) => None,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accept(_) => "Accept",
            Self::DeclineToAct => "DeclineToAct",
            Self::SoftDeny(_) => "SoftDeny",
            Self::HardDeny(_) => "HardDeny",
            Self::SoftDenyAndDisconnect(_) => "SoftDenyAndDisconnect",
            Self::HardDenyAndDisconnect(_) => "HardDenyAndDisconnect",
            Self::ShortCircuitOk(_) => "ShortCircuitOk",
            Self::ShortCircuitDone(_) => "ShortCircuitDone",
        };

        match self.reason() {
            Some(reason) => write!(f, "{name}({reason})"),
            None => f.write_str(name),
        }
    }
}
