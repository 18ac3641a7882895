//! The SMTP side of the server: wire types, the per-connection session and
//! the mail transaction it builds.

pub mod address;
pub mod command;
pub mod connection;
pub mod dsn;
pub mod response;
pub mod session;
pub mod spool;
pub mod status;
pub mod transaction;
