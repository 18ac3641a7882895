use core::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};
use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    net::{IpAddr, SocketAddr},
};

use ulid::Ulid;

/// How the client introduced itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Greeting {
    #[default]
    None,
    /// `HELO`
    Basic,
    /// `EHLO`
    Extended,
}

impl Greeting {
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// The protocol name used in trace headers
    #[must_use]
    pub const fn protocol(self) -> &'static str {
        match self {
            Self::Extended => "ESMTP",
            Self::None | Self::Basic => "SMTP",
        }
    }
}

impl Display for Greeting {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Basic => "HELO",
            Self::Extended => "EHLO",
        })
    }
}

/// What is known about the connection, independent of the stream
#[derive(Debug, Clone)]
pub struct SessionInfo {
    id: Ulid,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub greeting: Greeting,
    /// The argument given to `HELO`/`EHLO`
    pub helo: String,
    /// Free-form values hooks keep for the life of the connection
    pub notes: BTreeMap<String, String>,
}

impl SessionInfo {
    #[must_use]
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            id: connection_id(remote),
            local,
            remote,
            greeting: Greeting::None,
            helo: String::new(),
            notes: BTreeMap::new(),
        }
    }

    /// Stable for the life of the connection; only used to correlate logs
    #[must_use]
    pub const fn id(&self) -> Ulid {
        self.id
    }

    #[must_use]
    pub const fn remote_ip(&self) -> IpAddr {
        self.remote.ip()
    }
}

/// A ULID whose random half is mixed with the remote address
fn connection_id(remote: SocketAddr) -> Ulid {
    let seed = Ulid::new();

    let mut hasher = DefaultHasher::new();
    remote.hash(&mut hasher);

    Ulid::from_parts(seed.timestamp_ms(), seed.random() ^ u128::from(hasher.finish()))
}
