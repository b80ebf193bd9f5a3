//! Wire codec for the CAD host socket.
//!
//! Requests are `{id, command, parameters}` and responses are
//! `{id, status, payload | error}`, one JSON document per frame. Two framings
//! are supported:
//!
//! - **Lines**: newline-delimited JSON (the default)
//! - **Length-prefixed**: a 4-byte big-endian length followed by the JSON
//!
//! [`FrameReader`] keeps partially received bytes between calls, so a read
//! that is dropped by a timeout or cancellation never loses or splits a
//! frame.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::error::{BridgeError, ErrorKind};

/// Largest frame accepted from the host.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame delimiting on the socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Newline-delimited JSON.
    #[default]
    Lines,
    /// 4-byte big-endian length prefix.
    LengthPrefixed,
}

/// A command sent to the host. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    id: String,
    command: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

impl CommandEnvelope {
    /// Builds an envelope with a fresh correlation id.
    #[must_use]
    pub fn new(command: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            parameters,
        }
    }

    /// Returns a copy of this envelope under a new correlation id, for retries.
    #[must_use]
    pub fn with_fresh_id(&self) -> Self {
        Self::new(self.command.clone(), self.parameters.clone())
    }

    /// Correlation id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command parameters.
    #[must_use]
    pub const fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }
}

/// Outcome status of a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The command succeeded.
    Success,
    /// The command failed.
    Error,
}

/// The result of one command, from the host, the simulator or the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    /// Correlation id of the request.
    pub id: String,
    /// Success or error.
    pub status: Status,
    /// Result data; empty on error.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Error kind, set on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error detail, set on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    /// A successful result.
    #[must_use]
    pub fn success(id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            status: Status::Success,
            payload,
            error_kind: None,
            error: None,
        }
    }

    /// A failed result carrying `error`.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: &BridgeError) -> Self {
        Self {
            id: id.into(),
            status: Status::Error,
            payload: Map::new(),
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
        }
    }

    /// Returns `true` on success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Error kind, if this is a failure.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    /// Renders the tool-layer JSON.
    ///
    /// Success is the payload plus `"success": true`. Failure is
    /// `{"success": false, "error": <kind>, "message": <detail>}`.
    #[must_use]
    pub fn to_tool_json(&self) -> Value {
        let mut object = Map::new();
        if self.is_success() {
            object.insert("success".to_string(), Value::Bool(true));
            for (key, value) in &self.payload {
                if key != "success" {
                    object.insert(key.clone(), value.clone());
                }
            }
        } else {
            let kind = self.error_kind.unwrap_or(ErrorKind::HostRejected);
            object.insert("success".to_string(), Value::Bool(false));
            object.insert("error".to_string(), Value::from(kind.as_str()));
            object.insert(
                "message".to_string(),
                Value::from(self.error.clone().unwrap_or_default()),
            );
        }
        Value::Object(object)
    }
}

/// Malformed frame contents.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    /// A required field is absent.
    #[error("frame is missing the '{0}' field")]
    MissingField(&'static str),

    /// A field has the wrong shape.
    #[error("invalid '{field}' field: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        message: String,
    },
}

impl From<DecodeError> for BridgeError {
    fn from(err: DecodeError) -> Self {
        Self::protocol(super::error::error_chain(&err))
    }
}

/// Failure to read a frame off the socket.
#[derive(Debug, Error)]
pub enum FrameError {
    /// I/O error on the socket.
    #[error("socket read failed")]
    Io(#[from] io::Error),

    /// The frame exceeds the maximum size.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Announced or buffered length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// The peer closed the socket in the middle of a frame.
    #[error("connection closed with {buffered} bytes of a partial frame")]
    Truncated {
        /// Bytes of the partial frame.
        buffered: usize,
    },
}

/// Serialises a command for the wire.
///
/// # Errors
///
/// Returns an error if the parameters cannot be serialised.
pub fn encode_command(envelope: &CommandEnvelope) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(envelope)
}

/// Parses a command frame. Used by host implementations and test fakes.
///
/// # Errors
///
/// Returns an error if the frame is not a command envelope.
pub fn decode_command(frame: &[u8]) -> Result<CommandEnvelope, DecodeError> {
    let value: Value = serde_json::from_slice(frame).map_err(DecodeError::InvalidJson)?;
    let id = string_field(&value, "id")?;
    let command = string_field(&value, "command")?;
    let parameters = match value.get("parameters") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(DecodeError::InvalidField {
                field: "parameters",
                message: "expected an object".to_string(),
            })
        }
    };
    Ok(CommandEnvelope {
        id,
        command,
        parameters,
    })
}

/// Serialises a result for the wire. Used by host implementations and test fakes.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialised.
pub fn encode_response(envelope: &ResultEnvelope) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(envelope)
}

/// Parses a host response frame.
///
/// A host-side `status: "error"` becomes a `HostRejected` failure carrying the
/// host's text verbatim.
///
/// # Errors
///
/// Returns an error if the frame is not a response envelope.
pub fn decode_response(frame: &[u8]) -> Result<ResultEnvelope, DecodeError> {
    let value: Value = serde_json::from_slice(frame).map_err(DecodeError::InvalidJson)?;
    let id = string_field(&value, "id")?;
    let status = string_field(&value, "status")?;

    match status.as_str() {
        "success" => {
            let payload = match value.get("payload") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(DecodeError::InvalidField {
                        field: "payload",
                        message: "expected an object".to_string(),
                    })
                }
            };
            Ok(ResultEnvelope::success(id, payload))
        }
        "error" => {
            let message = match value.get("error") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| Value::Object(map.clone()).to_string(), str::to_string),
                Some(Value::Null) | None => "host reported an error".to_string(),
                Some(other) => other.to_string(),
            };
            Ok(ResultEnvelope::failure(
                id,
                &BridgeError::HostRejected { message },
            ))
        }
        other => Err(DecodeError::InvalidField {
            field: "status",
            message: format!("expected 'success' or 'error', got '{other}'"),
        }),
    }
}

fn string_field(value: &Value, field: &'static str) -> Result<String, DecodeError> {
    match value.get(field) {
        Some(Value::String(text)) if !text.is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(DecodeError::InvalidField {
            field,
            message: "must not be empty".to_string(),
        }),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            message: "expected a string".to_string(),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns an error if writing fails or the frame is too large to prefix.
pub async fn write_frame<W>(writer: &mut W, framing: Framing, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Lines => {
            debug_assert!(
                !frame.contains(&b'\n'),
                "line-framed JSON must not contain embedded newlines"
            );
            writer.write_all(frame).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(frame.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
            writer.write_all(&len.to_be_bytes()).await?;
            writer.write_all(frame).await?;
        }
    }
    writer.flush().await
}

/// Cancellation-safe frame reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    framing: Framing,
    partial: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a reader.
    pub fn new(inner: R, framing: Framing) -> Self {
        Self {
            inner: BufReader::new(inner),
            framing,
            partial: Vec::new(),
            max_len: MAX_FRAME_LEN,
        }
    }

    /// Overrides the maximum frame length.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Mutable access to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Returns `true` if bytes have been received but not yet returned.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.partial.is_empty() || !self.inner.buffer().is_empty()
    }

    /// Reads the next frame.
    ///
    /// Returns `None` on a clean end of stream. Dropping the returned future
    /// before it completes is safe: received bytes stay buffered.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, an oversized frame, or a stream that
    /// ends inside a frame.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        match self.framing {
            Framing::Lines => self.read_line_frame().await,
            Framing::LengthPrefixed => self.read_prefixed_frame().await,
        }
    }

    async fn read_line_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            if let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }
            if self.partial.len() > self.max_len {
                return Err(FrameError::TooLarge {
                    len: self.partial.len(),
                    max: self.max_len,
                });
            }

            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return self.finish_at_eof();
            }
            let take = available
                .iter()
                .position(|b| *b == b'\n')
                .map_or(available.len(), |pos| pos + 1);
            self.partial.extend_from_slice(&available[..take]);
            self.inner.consume(take);
        }
    }

    async fn read_prefixed_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            if self.partial.len() >= 4 {
                let len = u32::from_be_bytes([
                    self.partial[0],
                    self.partial[1],
                    self.partial[2],
                    self.partial[3],
                ]) as usize;
                if len > self.max_len {
                    return Err(FrameError::TooLarge {
                        len,
                        max: self.max_len,
                    });
                }
                if self.partial.len() >= 4 + len {
                    let frame = self.partial[4..4 + len].to_vec();
                    self.partial.drain(..4 + len);
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
            }

            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return self.finish_at_eof();
            }
            let take = available.len();
            self.partial.extend_from_slice(available);
            self.inner.consume(take);
        }
    }

    fn finish_at_eof(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let blank = match self.framing {
            Framing::Lines => self.partial.iter().all(u8::is_ascii_whitespace),
            Framing::LengthPrefixed => self.partial.is_empty(),
        };
        if blank {
            self.partial.clear();
            Ok(None)
        } else {
            Err(FrameError::Truncated {
                buffered: self.partial.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::io::Builder;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn fresh_ids_are_unique() {
        let a = CommandEnvelope::new("create_sketch", params(json!({"plane": "XY"})));
        let b = a.with_fresh_id();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.command(), b.command());
        assert_eq!(a.parameters(), b.parameters());
    }

    #[test]
    fn command_encodes_wire_fields() {
        let envelope = CommandEnvelope::new("draw_circle", params(json!({"radius": 10})));
        let bytes = encode_command(&envelope).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["command"], "draw_circle");
        assert_eq!(value["parameters"]["radius"], 10);
        assert_eq!(value["id"], envelope.id());

        let decoded = decode_command(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn success_response_decodes() {
        let frame = br#"{"id":"a1","status":"success","payload":{"sketch_name":"S1"}}"#;
        let result = decode_response(frame).unwrap();
        assert!(result.is_success());
        assert_eq!(result.payload["sketch_name"], "S1");
    }

    #[test]
    fn host_error_becomes_host_rejected() {
        let frame = br#"{"id":"a1","status":"error","error":"No active design"}"#;
        let result = decode_response(frame).unwrap();
        assert_eq!(result.kind(), Some(ErrorKind::HostRejected));
        assert_eq!(result.error.as_deref(), Some("No active design"));

        let frame = br#"{"id":"a1","status":"error","error":{"message":"Sketch locked"}}"#;
        let result = decode_response(frame).unwrap();
        assert_eq!(result.error.as_deref(), Some("Sketch locked"));
    }

    #[test]
    fn malformed_responses_are_rejected() {
        assert!(matches!(
            decode_response(b"not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_response(br#"{"status":"success"}"#),
            Err(DecodeError::MissingField("id"))
        ));
        assert!(matches!(
            decode_response(br#"{"id":"x","status":"maybe"}"#),
            Err(DecodeError::InvalidField { field: "status", .. })
        ));
        let err: BridgeError = decode_response(b"{}").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn tool_json_shapes() {
        let ok = ResultEnvelope::success("a", params(json!({"feature_name": "Extrude1"})));
        assert_eq!(
            ok.to_tool_json(),
            json!({"success": true, "feature_name": "Extrude1"})
        );

        let failed = ResultEnvelope::failure("a", &BridgeError::unavailable("degraded"));
        let json = failed.to_tool_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "ServiceUnavailable");
    }

    #[tokio::test]
    async fn reads_lines_across_partial_reads() {
        let mock = Builder::new()
            .read(b"{\"a\":")
            .read(b"1}\r\n\n{\"b\":2}\n")
            .build();
        let mut reader = FrameReader::new(mock, Framing::Lines);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"{\"a\":1}");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"{\"b\":2}");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_length_prefixed_frames() {
        let mock = Builder::new()
            .read(&[0, 0, 0, 3])
            .read(b"abc")
            .read(&[0, 0, 0, 2, b'h', b'i'])
            .build();
        let mut reader = FrameReader::new(mock, Framing::LengthPrefixed);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"abc");
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"hi");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let mock = Builder::new().read(b"{\"partial\":").build();
        let mut reader = FrameReader::new(mock, Framing::Lines);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        let mock = Builder::new().read(&[0xFF, 0xFF, 0xFF, 0xFF]).build();
        let mut reader = FrameReader::new(mock, Framing::LengthPrefixed).with_max_len(1024);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn write_frame_terminates_lines() {
        let mock = Builder::new().write(b"{}").write(b"\n").build();
        let mut writer = mock;
        write_frame(&mut writer, Framing::Lines, b"{}").await.unwrap();
    }
}
