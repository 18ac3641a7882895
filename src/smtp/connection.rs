use core::fmt::Display;
use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// What a single line read produced
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// Bytes up to and including '\n'
    Complete(Vec<u8>),
    /// `limit` bytes arrived without a '\n'
    Truncated(Vec<u8>),
    /// The peer closed the stream; holds any unterminated trailing bytes
    Eof(Vec<u8>),
}

/// The client's byte stream, read a line at a time
pub struct Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    stream: BufReader<Stream>,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Write `response` followed by CRLF
    pub(crate) async fn send<S: Display + Send + Sync>(&mut self, response: &S) -> io::Result<usize> {
        let bytes = format!("{response}\r\n");

        let stream = self.stream.get_mut();
        stream.write_all(bytes.as_bytes()).await?;
        stream.flush().await?;

        Ok(bytes.len())
    }

    /// Read one line of at most `limit` bytes
    pub(crate) async fn receive(&mut self, limit: usize) -> io::Result<Line> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(limit as u64)
            .read_until(b'\n', &mut line)
            .await?;

        Ok(if line.ends_with(b"\n") {
            Line::Complete(line)
        } else if read >= limit {
            Line::Truncated(line)
        } else {
            Line::Eof(line)
        })
    }

    /// Throw away input up to and including the next '\n'. Returns `false`
    /// if the stream ended first.
    pub(crate) async fn discard_line(&mut self) -> io::Result<bool> {
        loop {
            let buffer = self.stream.fill_buf().await?;
            if buffer.is_empty() {
                return Ok(false);
            }

            if let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
                self.stream.consume(newline + 1);
                return Ok(true);
            }

            let len = buffer.len();
            self.stream.consume(len);
        }
    }

    /// Close the write half
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.get_mut().shutdown().await
    }
}
