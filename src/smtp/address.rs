//! Mailbox parsing for envelope paths.
//!
//! Accepts the shapes clients actually send after `MAIL FROM:` and
//! `RCPT TO:`:
//!
//! ```text
//! user@host
//! <user@host>
//! <@relay.example:user@host>     ; source route, discarded
//! Name <user@host>
//! "Quoted Name" <user@host>
//! <>                             ; null reverse-path
//! ```
//!
//! The mailbox itself follows RFC 5321 section 4.1.2:
//!
//! ```text
//! Mailbox        = Local-part "@" ( Domain / address-literal )
//! Local-part     = Dot-string / Quoted-string
//! Domain         = sub-domain *("." sub-domain)
//! sub-domain     = Let-dig [Ldh-str]
//! ```
//!
//! with the usual limits of 64 octets for the local part, 255 for the
//! domain and 256 for the whole path.

use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

const MAX_PATH: usize = 256;
const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Path exceeds {MAX_PATH} octets")]
    PathTooLong,
    #[error("Local-part exceeds {MAX_LOCAL_PART} octets")]
    LocalPartTooLong,
    #[error("Domain exceeds {MAX_DOMAIN} octets")]
    DomainTooLong,
    #[error("Missing closing angle bracket '>'")]
    MissingCloseBracket,
    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,
    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),
    #[error("Invalid display name: {0}")]
    InvalidDisplayName(String),
}

pub type Result<T> = core::result::Result<T, AddressError>;

/// A parsed mailbox. The null reverse-path has an empty local part and
/// domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub local_part: String,
    pub domain: String,
    pub display_name: String,
}

impl Address {
    /// The null reverse-path, `<>`
    #[must_use]
    pub fn null() -> Self {
        Self::default()
    }

    /// Parse any of the accepted shapes.
    ///
    /// # Errors
    /// An [`AddressError`] describing the first problem found.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        match find_angle_open(input) {
            Some(open) => {
                if !input.ends_with('>') {
                    return Err(AddressError::MissingCloseBracket);
                }

                let display_name = parse_display_name(&input[..open])?;
                let content = &input[open + 1..input.len() - 1];
                if content.trim().is_empty() {
                    return Ok(Self {
                        display_name,
                        ..Self::null()
                    });
                }

                let mailbox = find_source_route_colon(content)
                    .map_or(content, |colon| &content[colon + 1..]);
                let (local_part, domain) = parse_mailbox(mailbox.trim())?;

                Ok(Self {
                    local_part,
                    domain,
                    display_name,
                })
            }
            None if input.ends_with('>') => Err(AddressError::InvalidLocalPart(format!(
                "Unbalanced '>' in {input}"
            ))),
            None => {
                let (local_part, domain) = parse_mailbox(input)?;
                Ok(Self {
                    local_part,
                    domain,
                    display_name: String::new(),
                })
            }
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.local_part.is_empty() && self.domain.is_empty()
    }

    /// `user@host`, or the empty string for the null path
    #[must_use]
    pub fn mailbox(&self) -> String {
        if self.is_null() {
            String::new()
        } else {
            format!("{}@{}", self.local_part, self.domain)
        }
    }

    /// The address as an envelope path: `<user@host>` or `<>`
    #[must_use]
    pub fn path(&self) -> String {
        format!("<{}>", self.mailbox())
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            return f.write_str(&self.mailbox());
        }

        if self.display_name.chars().any(is_special) {
            let escaped = self
                .display_name
                .replace('\\', "\\\\")
                .replace('"', "\\\"");
            write!(f, "\"{escaped}\" {}", self.path())
        } else {
            write!(f, "{} {}", self.display_name, self.path())
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

/// Anything that can stand in for an [`Address`] where one is expected,
/// parsing strings on the way in.
pub trait IntoAddress {
    /// # Errors
    /// If the value is a string that does not parse.
    fn into_address(self) -> Result<Address>;
}

impl IntoAddress for Address {
    fn into_address(self) -> Result<Address> {
        Ok(self)
    }
}

impl IntoAddress for &Address {
    fn into_address(self) -> Result<Address> {
        Ok(self.clone())
    }
}

impl IntoAddress for &str {
    fn into_address(self) -> Result<Address> {
        Address::parse(self)
    }
}

impl IntoAddress for String {
    fn into_address(self) -> Result<Address> {
        Address::parse(&self)
    }
}

/// Position of the `<` opening the angle address, skipping quoted names
fn find_angle_open(input: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => return Some(i),
            _ => {}
        }
    }

    None
}

fn parse_display_name(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(String::new());
    }

    if let Some(quoted) = input.strip_prefix('"') {
        let Some(inner) = quoted.strip_suffix('"') else {
            return Err(AddressError::InvalidDisplayName(format!(
                "Unclosed quote in {input}"
            )));
        };

        let mut name = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some(next) => name.push(next),
                    None => {
                        return Err(AddressError::InvalidDisplayName(
                            "Backslash at end of quoted name".to_string(),
                        ))
                    }
                },
                '"' => {
                    return Err(AddressError::InvalidDisplayName(format!(
                        "Stray quote in {input}"
                    )))
                }
                _ => name.push(ch),
            }
        }

        return Ok(name);
    }

    if let Some(bad) = input
        .chars()
        .find(|&ch| !matches!(ch, ' ' | '.') && is_special(ch))
    {
        return Err(AddressError::InvalidDisplayName(format!(
            "Unquoted '{bad}' in {input}"
        )));
    }

    Ok(input.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Position of the source route ':' in `@a,@b:user@host`, if any
fn find_source_route_colon(input: &str) -> Option<usize> {
    if !input.starts_with('@') {
        return None;
    }

    let mut in_brackets = false;
    for (i, ch) in input.char_indices() {
        match ch {
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            ':' if !in_brackets => return Some(i),
            _ => {}
        }
    }

    None
}

fn parse_mailbox(input: &str) -> Result<(String, String)> {
    let at = find_unquoted_at(input)?;
    let (local_part, domain) = (&input[..at], &input[at + 1..]);

    if local_part.len() > MAX_LOCAL_PART {
        return Err(AddressError::LocalPartTooLong);
    }
    if domain.len() > MAX_DOMAIN {
        return Err(AddressError::DomainTooLong);
    }

    parse_local_part(local_part)?;
    if domain.starts_with('[') {
        parse_address_literal(domain)?;
    } else {
        parse_domain(domain)?;
    }

    // Path = "<" Mailbox ">"
    if input.len() + 2 > MAX_PATH {
        return Err(AddressError::PathTooLong);
    }

    Ok((local_part.to_string(), domain.to_string()))
}

/// The last '@' outside a quoted local part
fn find_unquoted_at(input: &str) -> Result<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut at = None;

    for (i, ch) in input.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '@' if !in_quotes => at = Some(i),
            _ => {}
        }
    }

    at.ok_or(AddressError::MissingAtSign)
}

fn parse_local_part(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(AddressError::InvalidLocalPart(
            "Empty local-part".to_string(),
        ));
    }

    if input.starts_with('"') {
        return parse_quoted_string(input);
    }

    for atom in input.split('.') {
        if atom.is_empty() {
            return Err(AddressError::InvalidLocalPart(format!(
                "Empty atom in {input}"
            )));
        }

        if let Some(ch) = atom.chars().find(|&ch| !is_atext(ch)) {
            return Err(AddressError::InvalidLocalPart(format!(
                "Invalid character '{ch}' in atom"
            )));
        }
    }

    Ok(())
}

fn parse_quoted_string(input: &str) -> Result<()> {
    let Some(content) = input
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return Err(AddressError::InvalidLocalPart(
            "Unclosed quoted string".to_string(),
        ));
    };

    let mut chars = content.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) if next == ' ' || next.is_ascii_graphic() => {}
                Some(next) => {
                    return Err(AddressError::InvalidLocalPart(format!(
                        "Invalid quoted-pair: \\{next}"
                    )))
                }
                None => {
                    return Err(AddressError::InvalidLocalPart(
                        "Backslash at end of quoted string".to_string(),
                    ))
                }
            },
            ch if is_qtext_smtp(ch) => {}
            ch => {
                return Err(AddressError::InvalidLocalPart(format!(
                    "Invalid character '{ch}' in quoted string"
                )))
            }
        }
    }

    Ok(())
}

fn parse_domain(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".to_string()));
    }

    for label in input.split('.') {
        let valid = !label.is_empty()
            && label.starts_with(|ch: char| ch.is_ascii_alphanumeric())
            && label.ends_with(|ch: char| ch.is_ascii_alphanumeric())
            && label
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');

        if !valid {
            return Err(AddressError::InvalidDomain(format!(
                "Invalid label '{label}' in {input}"
            )));
        }
    }

    Ok(())
}

fn parse_address_literal(input: &str) -> Result<()> {
    let Some(literal) = input
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Err(AddressError::InvalidAddressLiteral(input.to_string()));
    };

    if let Some(v6) = literal.strip_prefix("IPv6:") {
        return v6
            .parse::<Ipv6Addr>()
            .map(|_| ())
            .map_err(|_| AddressError::InvalidAddressLiteral(input.to_string()));
    }

    if literal.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }

    // General-address-literal: Standardized-tag ":" 1*dcontent
    match literal.split_once(':') {
        Some((tag, content))
            if !tag.is_empty()
                && tag.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
                && !content.is_empty()
                && content
                    .chars()
                    .all(|ch| matches!(ch, '!'..='Z' | '^'..='~')) =>
        {
            Ok(())
        }
        _ => Err(AddressError::InvalidAddressLiteral(input.to_string())),
    }
}

const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

const fn is_qtext_smtp(ch: char) -> bool {
    matches!(ch, ' ' | '!' | '#'..='[' | ']'..='~')
}

/// RFC 5322 specials, which force a display name to be quoted
const fn is_special(ch: char) -> bool {
    matches!(
        ch,
        '(' | ')' | '<' | '>' | '[' | ']' | ':' | ';' | '@' | '\\' | ',' | '.' | '"'
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn address(local_part: &str, domain: &str, display_name: &str) -> Address {
        Address {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
            display_name: display_name.to_string(),
        }
    }

    #[test]
    fn accepted_shapes() {
        for input in ["user@host", "<user@host>", " <user@host> ", "<@relay,@other:user@host>"] {
            assert_eq!(Address::parse(input), Ok(address("user", "host", "")), "{input}");
        }

        assert_eq!(
            Address::parse("Display Name <user@host>"),
            Ok(address("user", "host", "Display Name"))
        );
        assert_eq!(
            Address::parse("\"Display Name\" <user@host>"),
            Ok(address("user", "host", "Display Name"))
        );
        assert_eq!(
            Address::parse("\"Smith, J. \\\"Jo\\\"\" <jo@example.com>"),
            Ok(address("jo", "example.com", "Smith, J. \"Jo\""))
        );
    }

    #[test]
    fn null_path() {
        let null = Address::parse("<>").unwrap();
        assert!(null.is_null());
        assert_eq!(null, Address::null());
        assert_eq!(null.path(), "<>");
        assert_eq!(null.to_string(), "");
    }

    #[test]
    fn local_parts_and_domains() {
        assert!(Address::parse("first.last+tag@sub.example.com").is_ok());
        assert!(Address::parse("\"john doe\"@example.com").is_ok());
        assert!(Address::parse("\"a@b\"@example.com").is_ok());
        assert!(Address::parse("user@[192.0.2.1]").is_ok());
        assert!(Address::parse("user@[IPv6:2001:db8::1]").is_ok());

        assert_eq!(
            Address::parse("<\"a@b\"@example.com>").map(|addr| addr.local_part),
            Ok("\"a@b\"".to_string())
        );
    }

    #[test]
    fn rejected() {
        assert_eq!(Address::parse(""), Err(AddressError::Empty));
        assert_eq!(Address::parse("   "), Err(AddressError::Empty));
        assert_eq!(Address::parse("userhost"), Err(AddressError::MissingAtSign));
        assert_eq!(
            Address::parse("<user@host"),
            Err(AddressError::MissingCloseBracket)
        );
        assert!(matches!(
            Address::parse(".user@host"),
            Err(AddressError::InvalidLocalPart(_))
        ));
        assert!(matches!(
            Address::parse("us..er@host"),
            Err(AddressError::InvalidLocalPart(_))
        ));
        assert!(matches!(
            Address::parse("user@-host.com"),
            Err(AddressError::InvalidDomain(_))
        ));
        assert!(matches!(
            Address::parse("user@host..com"),
            Err(AddressError::InvalidDomain(_))
        ));
        assert!(matches!(
            Address::parse("user@[300.1.1.1]"),
            Err(AddressError::InvalidAddressLiteral(_))
        ));
        assert!(matches!(
            Address::parse("Bad, Name <user@host>"),
            Err(AddressError::InvalidDisplayName(_))
        ));
    }

    #[test]
    fn length_limits() {
        let local = "a".repeat(65);
        assert_eq!(
            Address::parse(&format!("{local}@host")),
            Err(AddressError::LocalPartTooLong)
        );

        let label = "a".repeat(63);
        let domain = [label.as_str(); 5].join(".");
        assert_eq!(
            Address::parse(&format!("user@{domain}")),
            Err(AddressError::DomainTooLong)
        );

        let domain = [label.as_str(); 4].join(".");
        let local = "b".repeat(64);
        assert_eq!(
            Address::parse(&format!("<{local}@{domain}>")),
            Err(AddressError::PathTooLong)
        );
    }

    #[test]
    fn formatting() {
        let plain = Address::parse("<user@host>").unwrap();
        assert_eq!(plain.to_string(), "user@host");
        assert_eq!(plain.path(), "<user@host>");

        let named = Address::parse("Jo Bloggs <jo@example.com>").unwrap();
        assert_eq!(named.to_string(), "Jo Bloggs <jo@example.com>");
        assert_eq!(named.path(), "<jo@example.com>");

        let special = Address::parse("\"Bloggs, Jo\" <jo@example.com>").unwrap();
        assert_eq!(special.to_string(), "\"Bloggs, Jo\" <jo@example.com>");

        for addr in [plain, named, special] {
            assert_eq!(Address::parse(&addr.to_string()), Ok(addr));
        }
    }

    #[test]
    fn equality_includes_display_name() {
        let bare = Address::parse("jo@example.com").unwrap();
        let named = Address::parse("Jo <jo@example.com>").unwrap();
        assert_ne!(bare, named);
        assert_eq!(bare, Address::parse("<jo@example.com>").unwrap());
    }

    #[test]
    fn into_address() {
        assert_eq!("user@host".into_address(), Ok(address("user", "host", "")));
        assert_eq!(
            String::from("<user@host>").into_address(),
            Ok(address("user", "host", ""))
        );
        assert!("nope".into_address().is_err());
    }
}
