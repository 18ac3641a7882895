use std::{collections::BTreeMap, path::Path};

use super::{
    address::{Address, AddressError, IntoAddress},
    command::Params,
    spool::Spool,
};
use crate::error::SpoolError;

/// One mail transaction: the envelope, the spooled body and anything hooks
/// want to remember about it.
///
/// A transaction starts when `MAIL` is accepted and is discarded on every
/// reset. It is never shared between connections.
#[derive(Debug, Default)]
pub struct Transaction {
    sender: Option<Address>,
    recipients: Vec<Address>,
    params: Params,
    body: Spool,
    /// Header lines added by the server, newest first, each ending in CRLF
    trace: Vec<String>,
    pub notes: BTreeMap<String, String>,
}

impl Transaction {
    #[must_use]
    pub fn new(body: Spool) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    /// Set the envelope sender. A transaction has at most one.
    ///
    /// # Errors
    /// Returns the rejected address if a sender is already set.
    pub fn set_sender(&mut self, sender: Address, params: Params) -> Result<(), Address> {
        if self.sender.is_some() {
            return Err(sender);
        }

        self.sender = Some(sender);
        self.params = params;
        Ok(())
    }

    /// Parameters given with `MAIL`
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// # Errors
    /// If `recipient` is a string that does not parse.
    pub fn add_recipient(&mut self, recipient: impl IntoAddress) -> Result<(), AddressError> {
        self.recipients.push(recipient.into_address()?);
        Ok(())
    }

    /// Remove the first recipient equal to `recipient`, returning whether
    /// one was found.
    ///
    /// # Errors
    /// If `recipient` is a string that does not parse.
    pub fn remove_recipient(&mut self, recipient: impl IntoAddress) -> Result<bool, AddressError> {
        let recipient = recipient.into_address()?;

        Ok(self
            .recipients
            .iter()
            .position(|existing| *existing == recipient)
            .map(|position| self.recipients.remove(position))
            .is_some())
    }

    /// # Errors
    /// If the spool cannot be written.
    pub fn body_write(&mut self, bytes: &[u8]) -> Result<(), SpoolError> {
        self.body.write(bytes)
    }

    /// # Errors
    /// If the header boundary was already recorded.
    pub fn end_headers(&mut self) -> Result<(), SpoolError> {
        self.body.end_headers()
    }

    /// Path of the spooled body, forcing it onto disk first
    ///
    /// # Errors
    /// If the spool cannot be materialized.
    pub fn body_filename(&mut self) -> Result<&Path, SpoolError> {
        self.body.materialize()
    }

    #[must_use]
    pub const fn body(&self) -> &Spool {
        &self.body
    }

    /// Bytes received after `DATA`, excluding server-added headers
    #[must_use]
    pub const fn data_size(&self) -> u64 {
        self.body.len()
    }

    /// Add a header above everything received and previously prepended
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        self.trace.insert(0, format!("{name}: {value}\r\n"));
    }

    /// All headers, server-added ones first, as `(name, value)` pairs with
    /// folded values unfolded.
    ///
    /// # Errors
    /// If the spool cannot be read or the header block is malformed.
    pub fn headers(&self) -> Result<Vec<(String, String)>, SpoolError> {
        let mut block = self.trace.concat().into_bytes();
        block.extend(self.body.read_headers()?);
        if self.body.header_offset().is_none() {
            block.extend_from_slice(b"\r\n");
        }

        let (headers, _) = mailparse::parse_headers(&block)?;

        Ok(headers
            .iter()
            .map(|header| (header.get_key(), header.get_value()))
            .collect())
    }

    /// The complete message as it should be queued
    ///
    /// # Errors
    /// If the spool cannot be read.
    pub fn message(&self) -> Result<Vec<u8>, SpoolError> {
        let mut message = self.trace.concat().into_bytes();
        message.extend(self.body.read_all()?);

        Ok(message)
    }
}
