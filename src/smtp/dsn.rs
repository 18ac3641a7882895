//! Enhanced mail system status codes (RFC 1893 / RFC 3463).
//!
//! Replies that carry an extended status append it to their text as
//! `"<text> (#class.subject.detail)"`. The text defaults to the RFC
//! description of the `subject.detail` pair.

use core::fmt::{self, Display, Formatter};

use crate::hooks::{Outcome, Severity};

static RFC1893: [&[&str]; 8] = [
    &["Other or Undefined Status"],
    &[
        "Other address status.",
        "Bad destination mailbox address.",
        "Bad destination system address.",
        "Bad destination mailbox address syntax.",
        "Destination mailbox address ambiguous.",
        "Destination address valid.",
        "Destination mailbox has moved, No forwarding address.",
        "Bad sender's mailbox address syntax.",
        "Bad sender's system address.",
    ],
    &[
        "Other or undefined mailbox status.",
        "Mailbox disabled, not accepting messages.",
        "Mailbox full.",
        "Message length exceeds administrative limit.",
        "Mailing list expansion problem.",
    ],
    &[
        "Other or undefined mail system status.",
        "Mail system full.",
        "System not accepting network messages.",
        "System not capable of selected features.",
        "Message too big for system.",
        "System incorrectly configured.",
    ],
    &[
        "Other or undefined network or routing status.",
        "No answer from host.",
        "Bad connection.",
        "Directory server failure.",
        "Unable to route.",
        "Mail system congestion.",
        "Routing loop detected.",
        "Delivery time expired.",
    ],
    &[
        "Other or undefined protocol status.",
        "Invalid command.",
        "Syntax error.",
        "Too many recipients.",
        "Invalid command arguments.",
        "Wrong protocol version.",
    ],
    &[
        "Other or undefined media error.",
        "Media not supported.",
        "Conversion required and prohibited.",
        "Conversion required but not supported.",
        "Conversion with loss performed.",
        "Conversion Failed.",
    ],
    &[
        "Other or undefined security status.",
        "Delivery not authorized, message refused.",
        "Mailing list expansion prohibited.",
        "Security conversion required but not possible.",
        "Security features not supported.",
        "Cryptographic failure.",
        "Cryptographic algorithm not supported.",
        "Message integrity failure.",
    ],
];

/// A `class.subject.detail` triple
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtendedStatus {
    pub class: u8,
    pub subject: u8,
    pub detail: u8,
}

impl Display for ExtendedStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Resolve `subject.detail` against the table, falling back to detail 0 of
/// the same subject and then to `0.0`. Returns the pair actually used.
#[must_use]
pub fn lookup(subject: u8, detail: u8) -> (u8, u8, &'static str) {
    let row = RFC1893.get(usize::from(subject)).copied();

    if let Some(text) = row.and_then(|row| row.get(usize::from(detail)).copied()) {
        return (subject, detail, text);
    }

    if let Some(text) = row.and_then(|row| row.first().copied()) {
        return (subject, 0, text);
    }

    (0, 0, RFC1893[0][0])
}

/// Format a reply text with its extended status suffix
#[must_use]
pub fn render(class: u8, subject: u8, detail: u8, reason: Option<&str>) -> String {
    let (subject, detail, text) = lookup(subject, detail);
    let status = ExtendedStatus {
        class,
        subject,
        detail,
    };

    format!("{} (#{status})", reason.unwrap_or(text))
}

/// Named status codes that hooks can answer with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsnCode {
    Unspecified,
    AddrUnspecified,
    NoSuchUser,
    AddrBadDestMbox,
    AddrBadDestSystem,
    AddrBadDestSyntax,
    AddrBadDestAmbiguous,
    AddrRcptOk,
    AddrMboxMoved,
    AddrBadFromSyntax,
    AddrBadFromSystem,
    MboxUnspecified,
    MboxDisabled,
    MboxFull,
    MboxMsgTooLong,
    MboxListExpansionProblem,
    SysUnspecified,
    SysDiskFull,
    SysNotAcceptingMail,
    SysNotSupported,
    SysMsgTooBig,
    NetUnspecified,
    TempResolverFailed,
    NetDirectoryServerFailed,
    NetSystemCongested,
    NetRoutingLoop,
    TooManyHops,
    ProtoUnspecified,
    ProtoInvalidCommand,
    ProtoSyntaxError,
    ProtoRcptListTooLong,
    TooManyRcpts,
    ProtoInvalidCmdArgs,
    ProtoWrongVersion,
    MediaUnspecified,
    MediaUnsupported,
    MediaConvProhibited,
    MediaConvUnsupported,
    MediaConvLossy,
    SecUnspecified,
    SecSenderUnauthorized,
    BadSenderIp,
    RelayingDenied,
    SecListDestProhibited,
    SecConvFailed,
    SecFeatureUnsupported,
    SecCryptoFailure,
    SecCryptoAlgorithmUnsupported,
    SecMsgIntegrityFailure,
}

impl DsnCode {
    /// Default severity, subject and detail for this code
    #[must_use]
    pub const fn definition(self) -> (Option<Severity>, u8, u8) {
        use Severity::{Hard, Soft};

        match self {
            Self::Unspecified => (Some(Soft), 0, 0),
            Self::AddrUnspecified | Self::NoSuchUser => (Some(Soft), 1, 0),
            Self::AddrBadDestMbox => (Some(Hard), 1, 1),
            Self::AddrBadDestSystem => (Some(Hard), 1, 2),
            Self::AddrBadDestSyntax => (Some(Hard), 1, 3),
            Self::AddrBadDestAmbiguous => (Some(Soft), 1, 4),
            Self::AddrRcptOk => (None, 1, 5),
            Self::AddrMboxMoved => (Some(Hard), 1, 6),
            Self::AddrBadFromSyntax => (Some(Hard), 1, 7),
            Self::AddrBadFromSystem => (Some(Hard), 1, 8),
            Self::MboxUnspecified => (Some(Soft), 2, 0),
            Self::MboxDisabled => (Some(Hard), 2, 1),
            Self::MboxFull => (Some(Soft), 2, 2),
            Self::MboxMsgTooLong => (Some(Hard), 2, 3),
            Self::MboxListExpansionProblem => (Some(Soft), 2, 4),
            Self::SysUnspecified => (Some(Soft), 3, 0),
            Self::SysDiskFull => (Some(Soft), 3, 1),
            Self::SysNotAcceptingMail => (Some(Soft), 3, 2),
            Self::SysNotSupported => (Some(Soft), 3, 3),
            Self::SysMsgTooBig => (Some(Hard), 3, 4),
            Self::NetUnspecified => (Some(Soft), 4, 0),
            Self::TempResolverFailed | Self::NetDirectoryServerFailed => (Some(Soft), 4, 3),
            Self::NetSystemCongested => (Some(Soft), 4, 5),
            Self::NetRoutingLoop | Self::TooManyHops => (Some(Hard), 4, 6),
            Self::ProtoUnspecified => (Some(Soft), 5, 0),
            Self::ProtoInvalidCommand => (Some(Hard), 5, 1),
            Self::ProtoSyntaxError => (Some(Hard), 5, 2),
            Self::ProtoRcptListTooLong | Self::TooManyRcpts => (Some(Soft), 5, 3),
            Self::ProtoInvalidCmdArgs => (Some(Hard), 5, 4),
            Self::ProtoWrongVersion => (Some(Soft), 5, 5),
            Self::MediaUnspecified => (Some(Soft), 6, 0),
            Self::MediaUnsupported => (Some(Hard), 6, 1),
            Self::MediaConvProhibited => (Some(Hard), 6, 2),
            Self::MediaConvUnsupported => (Some(Soft), 6, 3),
            Self::MediaConvLossy => (Some(Soft), 6, 4),
            Self::SecUnspecified => (Some(Soft), 7, 0),
            Self::SecSenderUnauthorized | Self::BadSenderIp | Self::RelayingDenied => {
                (Some(Hard), 7, 1)
            }
            Self::SecListDestProhibited => (Some(Hard), 7, 2),
            Self::SecConvFailed => (Some(Hard), 7, 3),
            Self::SecFeatureUnsupported => (Some(Hard), 7, 4),
            Self::SecCryptoFailure => (Some(Hard), 7, 5),
            Self::SecCryptoAlgorithmUnsupported => (Some(Soft), 7, 6),
            Self::SecMsgIntegrityFailure => (Some(Hard), 7, 7),
        }
    }

    /// Reply text used instead of the table entry
    #[must_use]
    pub const fn alternative(self) -> Option<&'static str> {
        match self {
            Self::NoSuchUser => Some("No such user"),
            Self::TempResolverFailed => Some("Temporary address resolution failure"),
            Self::TooManyHops => Some("Too many hops"),
            Self::BadSenderIp => Some("Bad sender's IP"),
            Self::RelayingDenied => Some("Relaying denied"),
            _ => None,
        }
    }

    /// Render with this code's default severity
    #[must_use]
    pub fn message(self, reason: Option<&str>) -> String {
        let (severity, _, _) = self.definition();
        self.message_as(severity, reason)
    }

    /// Render with an explicit severity (`None` reports class 2)
    #[must_use]
    pub fn message_as(self, severity: Option<Severity>, reason: Option<&str>) -> String {
        let (_, subject, detail) = self.definition();
        let class = match severity {
            Some(Severity::Hard) => 5,
            Some(Severity::Soft) => 4,
            None => 2,
        };

        render(class, subject, detail, reason.or(self.alternative()))
    }

    /// The outcome a hook returns to answer with this code
    #[must_use]
    pub fn outcome(self, reason: Option<&str>) -> Outcome {
        let (severity, _, _) = self.definition();
        let text = self.message(reason);

        match severity {
            Some(Severity::Hard) => Outcome::hard_deny(text),
            Some(Severity::Soft) => Outcome::soft_deny(text),
            None => Outcome::accept_with(text),
        }
    }
}
