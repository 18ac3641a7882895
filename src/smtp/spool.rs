//! Message body storage for a transaction.
//!
//! Small messages stay in memory. Once a write would take the body past
//! the rollover threshold the buffered bytes are copied to an anonymous
//! temporary file and every later write goes there. The file is removed
//! when the spool is dropped.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::error::SpoolError;

/// Default rollover threshold, 256 KiB
pub const DEFAULT_ROLLOVER: usize = 256 * 1024;

enum Backing {
    Memory(Vec<u8>),
    File(NamedTempFile),
}

pub struct Spool {
    backing: Backing,
    len: u64,
    rollover: usize,
    directory: Option<PathBuf>,
    header_offset: Option<u64>,
}

impl Default for Spool {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLOVER)
    }
}

impl core::fmt::Debug for Spool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Spool")
            .field("len", &self.len)
            .field("materialized", &self.is_materialized())
            .field("path", &self.path())
            .field("header_offset", &self.header_offset)
            .finish()
    }
}

impl Spool {
    #[must_use]
    pub const fn new(rollover: usize) -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            len: 0,
            rollover,
            directory: None,
            header_offset: None,
        }
    }

    /// Create backing files in `directory` rather than the system default
    #[must_use]
    pub fn with_directory(mut self, directory: Option<PathBuf>) -> Self {
        self.directory = directory;
        self
    }

    /// Append `bytes`, materializing first if they would take the body past
    /// the rollover threshold.
    ///
    /// # Errors
    /// If the backing file cannot be created or written.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SpoolError> {
        if matches!(self.backing, Backing::Memory(_))
            && self.len + bytes.len() as u64 > self.rollover as u64
        {
            self.materialize()?;
        }

        match &mut self.backing {
            Backing::Memory(buffer) => buffer.extend_from_slice(bytes),
            Backing::File(file) => file.write_all(bytes)?,
        }

        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Move the body to a file if it is not in one already, returning the
    /// file's path.
    ///
    /// # Errors
    /// If the backing file cannot be created or written.
    pub fn materialize(&mut self) -> Result<&Path, SpoolError> {
        if let Backing::Memory(buffer) = &self.backing {
            let file = self.spill(buffer)?;
            self.backing = Backing::File(file);
        }

        Ok(self.path().unwrap_or_else(|| Path::new("")))
    }

    fn spill(&self, buffer: &[u8]) -> Result<NamedTempFile, SpoolError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("waymark-").suffix(".eml");

        let mut file = match &self.directory {
            Some(directory) => builder.tempfile_in(directory)?,
            None => builder.tempfile()?,
        };
        file.write_all(buffer)?;

        Ok(file)
    }

    /// Record the current length as the start of the body. Call it once the
    /// blank line ending the header block has been written.
    ///
    /// # Errors
    /// [`SpoolError::HeadersAlreadyEnded`] if already recorded.
    pub fn end_headers(&mut self) -> Result<(), SpoolError> {
        if let Some(offset) = self.header_offset {
            return Err(SpoolError::HeadersAlreadyEnded(offset));
        }

        self.header_offset = Some(self.len);
        Ok(())
    }

    /// Byte offset of the first body byte, just past the blank separator
    /// line, once seen
    #[must_use]
    pub const fn header_offset(&self) -> Option<u64> {
        self.header_offset
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Path of the backing file, if materialized
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(file) => Some(file.path()),
            Backing::Memory(_) => None,
        }
    }

    /// Everything written so far.
    ///
    /// # Errors
    /// If the backing file cannot be read.
    pub fn read_all(&self) -> Result<Vec<u8>, SpoolError> {
        match &self.backing {
            Backing::Memory(buffer) => Ok(buffer.clone()),
            Backing::File(file) => {
                let mut contents = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
                file.reopen()?.read_to_end(&mut contents)?;
                Ok(contents)
            }
        }
    }

    /// The header block including its blank separator line, or everything
    /// if no boundary has been recorded.
    ///
    /// # Errors
    /// If the backing file cannot be read.
    pub fn read_headers(&self) -> Result<Vec<u8>, SpoolError> {
        let mut contents = self.read_all()?;
        if let Some(offset) = self.header_offset.and_then(|offset| usize::try_from(offset).ok()) {
            contents.truncate(offset);
        }

        Ok(contents)
    }
}
