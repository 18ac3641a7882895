use core::fmt::{self, Display, Formatter};

use super::status::Status;

/// A reply to the client, one or more lines under a single code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub lines: Vec<String>,
}

impl Reply {
    /// Build a reply. Embedded newlines start continuation lines.
    pub fn new(status: Status, text: impl AsRef<str>) -> Self {
        let lines = text
            .as_ref()
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();

        Self { status, lines }
    }
}

/// `250-first\r\n250 last`, without the final CRLF
impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);

        for (i, line) in self.lines.iter().enumerate() {
            if i < last {
                write!(f, "{}-{line}\r\n", self.status)?;
            } else {
                write!(f, "{} {line}", self.status)?;
            }
        }

        if self.lines.is_empty() {
            write!(f, "{} ", self.status)?;
        }

        Ok(())
    }
}
