//! Line-delimited transport for the MCP server.
//!
//! Each message is one line of UTF-8 JSON with no embedded newlines. Over
//! stdio, stdin carries client messages and stdout server messages; stderr is
//! left to logging.
//!
//! The reading half is owned by the server loop. The writing half is a
//! cloneable [`MessageSender`], so concurrently running tool calls can answer
//! as soon as they finish.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::mcp::protocol::{JsonRpcError, JsonRpcResponse, OutgoingNotification};

/// Reads client messages one line at a time.
///
/// Bytes of a partially read line are kept between calls, so `read_line`
/// can be raced against other futures in `select!` without losing input.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
    partial: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            partial: Vec::new(),
        }
    }

    /// Reads the next line without its terminator.
    ///
    /// Returns `None` at EOF. A final line without a newline is returned
    /// before that.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the line is not UTF-8.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.partial).await?;
        if read == 0 && self.partial.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.partial);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Writes server messages. Clones share the underlying stream; each message
/// is written and flushed whole.
#[derive(Debug)]
pub struct MessageSender<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for MessageSender<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: AsyncWrite + Unpin> MessageSender<W> {
    /// Wraps a byte sink.
    pub fn new(inner: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(inner)),
        }
    }

    /// Writes a success response.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_response(&self, response: &JsonRpcResponse) -> io::Result<()> {
        self.write_message(response).await
    }

    /// Writes an error response.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_error(&self, error: &JsonRpcError) -> io::Result<()> {
        self.write_message(error).await
    }

    /// Writes a server-initiated notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_notification(&self, notification: &OutgoingNotification) -> io::Result<()> {
        self.write_message(notification).await
    }

    async fn write_message<T: Serialize + Sync>(&self, message: &T) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        debug_assert!(!json.contains('\n'), "messages must be single-line JSON");

        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

/// Splits a stream pair into the two transport halves.
pub fn split<R, W>(reader: R, writer: W) -> (LineReader<R>, MessageSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (LineReader::new(reader), MessageSender::new(writer))
}

/// Transport halves over the process's stdin and stdout.
#[must_use]
pub fn stdio() -> (LineReader<tokio::io::Stdin>, MessageSender<tokio::io::Stdout>) {
    split(tokio::io::stdin(), tokio::io::stdout())
}
