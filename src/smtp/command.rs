use core::fmt::{self, Display, Formatter};
use std::collections::BTreeMap;

use thiserror::Error;

use super::address::{Address, AddressError};

/// ESMTP parameters from `MAIL`/`RCPT`, keys lowercased
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty command line")]
    Empty,
    #[error("Expected '{0}' before the path")]
    MissingPrefix(&'static str),
    #[error("Missing path")]
    MissingPath,
    #[error("Unterminated path")]
    UnterminatedPath,
    #[error("Null path is not a valid recipient")]
    NullRecipient,
    #[error(transparent)]
    Address(#[from] AddressError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Vrfy,
    Noop,
    Help,
    Quit,
    /// Anything else, as the client sent it
    Unknown(String),
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy => "VRFY",
            Self::Noop => "NOOP",
            Self::Help => "HELP",
            Self::Quit => "QUIT",
            Self::Unknown(verb) => verb,
        })
    }
}

impl From<&str> for Verb {
    fn from(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Self::Helo,
            "EHLO" => Self::Ehlo,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "VRFY" => Self::Vrfy,
            "NOOP" => Self::Noop,
            "HELP" => Self::Help,
            "QUIT" => Self::Quit,
            _ => Self::Unknown(verb.to_string()),
        }
    }
}

/// One command line, split into its verb and whatever follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub rest: String,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.rest.is_empty() {
            write!(f, "{}", self.verb)
        } else {
            write!(f, "{} {}", self.verb, self.rest)
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let (verb, rest) = line
            .split_once(|ch: char| ch.is_ascii_whitespace())
            .unwrap_or((line, ""));

        Ok(Self {
            verb: Verb::from(verb),
            rest: rest.trim().to_string(),
        })
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = CommandError;

    fn try_from(line: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(String::from_utf8_lossy(line).as_ref())
    }
}

/// The path and parameters of a `MAIL` or `RCPT` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathArguments {
    pub address: Address,
    pub params: Params,
}

/// Parse what follows `MAIL`: `FROM:<path> [params]`. `<>` is allowed.
///
/// # Errors
/// Any [`CommandError`] other than [`CommandError::Empty`].
pub fn parse_mail(rest: &str) -> Result<PathArguments, CommandError> {
    parse_path_arguments(rest, "FROM:")
}

/// Parse what follows `RCPT`: `TO:<path> [params]`.
///
/// # Errors
/// Any [`CommandError`] other than [`CommandError::Empty`], including
/// [`CommandError::NullRecipient`] for `<>`.
pub fn parse_rcpt(rest: &str) -> Result<PathArguments, CommandError> {
    let arguments = parse_path_arguments(rest, "TO:")?;
    if arguments.address.is_null() {
        return Err(CommandError::NullRecipient);
    }

    Ok(arguments)
}

fn parse_path_arguments(rest: &str, prefix: &'static str) -> Result<PathArguments, CommandError> {
    let rest = rest.trim_start();
    let Some(tail) = rest
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &rest[prefix.len()..])
    else {
        return Err(CommandError::MissingPrefix(prefix));
    };

    let (path, params) = split_path(tail.trim_start())?;

    Ok(PathArguments {
        address: Address::parse(path)?,
        params: parse_params(params),
    })
}

/// Split `<path> params` or `bare@path params`. Angle paths may carry a
/// quoted display name before the bracket.
fn split_path(input: &str) -> Result<(&str, &str), CommandError> {
    if input.is_empty() {
        return Err(CommandError::MissingPath);
    }

    let mut in_quotes = false;
    let mut escaped = false;
    let mut in_angle = false;

    for (i, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if in_angle && !in_quotes => {
                return Ok((&input[..=i], &input[i + 1..]));
            }
            ch if ch.is_ascii_whitespace() && !in_quotes && !in_angle && !input.contains('<') => {
                return Ok((&input[..i], &input[i..]));
            }
            _ => {}
        }
    }

    if in_quotes || in_angle {
        return Err(CommandError::UnterminatedPath);
    }

    Ok((input, ""))
}

/// `key=value` tokens; anything without '=' is ignored
fn parse_params(input: &str) -> Params {
    input
        .split_ascii_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(key, value)| (key.to_ascii_lowercase(), value.to_string()))
        .collect()
}
