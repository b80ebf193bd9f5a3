//! Connection manager for the CAD host socket.
//!
//! Owns the single TCP link to the host plugin. Requests are strictly
//! one-at-a-time: callers share the manager behind an async mutex, which
//! queues concurrent requests in arrival order. A FIFO of outstanding
//! correlation ids pairs responses with requests; responses to abandoned
//! requests (timed out or cancelled) are discarded when they arrive, and any
//! other mismatch tears the link down.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::codec::{
    decode_response, encode_command, write_frame, CommandEnvelope, FrameError, FrameReader,
    Framing, ResultEnvelope,
};
use super::error::{BridgeError, BridgeResult};

/// How long an idle link is watched for a pending close before writing.
const PROBE_WINDOW: Duration = Duration::from_millis(1);

/// Lifecycle state of the host link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No connection has been attempted, or it was closed deliberately.
    Unconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The link is up.
    Connected,
    /// The last attempt failed or the link was lost.
    Failed,
}

/// Point-in-time view of the connection, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Link state.
    pub state: ConnectionState,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connection attempts made so far.
    pub connect_attempts: u64,
    /// Requests written to the socket.
    pub requests_sent: u64,
    /// Requests written but not yet answered, including abandoned ones.
    pub outstanding: usize,
    /// Incremented on every successful connect.
    pub generation: u64,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
}

struct Link {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Owner of the socket lifecycle: connect, send, reconnect, teardown.
pub struct ConnectionManager {
    host: String,
    port: u16,
    framing: Framing,
    connect_timeout: Duration,
    link: Option<Link>,
    state: ConnectionState,
    outstanding: VecDeque<String>,
    write_pending: bool,
    generation: u64,
    connect_attempts: u64,
    requests_sent: u64,
    last_error: Option<String>,
    status: watch::Sender<ConnectionSnapshot>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state)
            .field("outstanding", &self.outstanding.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates an unconnected manager for `host:port`.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        framing: Framing,
        connect_timeout: Duration,
    ) -> Self {
        let host = host.into();
        let (status, _) = watch::channel(ConnectionSnapshot {
            state: ConnectionState::Unconnected,
            host: host.clone(),
            port,
            connect_attempts: 0,
            requests_sent: 0,
            outstanding: 0,
            generation: 0,
            last_error: None,
        });
        Self {
            host,
            port,
            framing,
            connect_timeout,
            link: None,
            state: ConnectionState::Unconnected,
            outstanding: VecDeque::new(),
            write_pending: false,
            generation: 0,
            connect_attempts: 0,
            requests_sent: 0,
            last_error: None,
            status,
        }
    }

    /// Current link state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection generation; changes whenever a new link is established.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns a receiver for connection snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.subscribe()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            host: self.host.clone(),
            port: self.port,
            connect_attempts: self.connect_attempts,
            requests_sent: self.requests_sent,
            outstanding: self.outstanding.len(),
            generation: self.generation,
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }

    /// Connects to `host:port`, replacing any existing link.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> ConnectionState {
        self.host = host.into();
        self.port = port;
        self.connect_timeout = timeout;
        self.establish().await
    }

    /// Drops the current link and connects again to the same endpoint.
    pub async fn reconnect(&mut self) -> ConnectionState {
        self.establish().await
    }

    async fn establish(&mut self) -> ConnectionState {
        self.teardown(ConnectionState::Connecting, None);
        self.connect_attempts += 1;
        self.publish();

        tracing::debug!(host = %self.host, port = self.port, "Connecting to CAD host");
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await;

        let error = match attempt {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                let (read_half, write_half) = stream.into_split();
                self.link = Some(Link {
                    reader: FrameReader::new(read_half, self.framing),
                    writer: write_half,
                });
                self.generation += 1;
                self.state = ConnectionState::Connected;
                self.last_error = None;
                self.publish();
                tracing::info!(
                    host = %self.host,
                    port = self.port,
                    generation = self.generation,
                    "Connected to CAD host"
                );
                return self.state;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connect timed out after {} ms",
                self.connect_timeout.as_millis()
            ),
        };

        tracing::debug!(host = %self.host, port = self.port, error = %error, "Connection attempt failed");
        self.state = ConnectionState::Failed;
        self.last_error = Some(error);
        self.publish();
        self.state
    }

    /// Closes the link.
    pub fn close(&mut self) {
        if self.link.is_some() {
            tracing::info!(host = %self.host, port = self.port, "Closing connection to CAD host");
        }
        self.teardown(ConnectionState::Unconnected, None);
    }

    fn teardown(&mut self, state: ConnectionState, reason: Option<String>) {
        self.link = None;
        self.outstanding.clear();
        self.write_pending = false;
        self.state = state;
        if reason.is_some() {
            self.last_error = reason;
        }
        self.publish();
    }

    fn lose(&mut self, message: impl Into<String>) -> BridgeError {
        let message = message.into();
        tracing::warn!(error = %message, "Connection to CAD host lost");
        self.teardown(ConnectionState::Failed, Some(message.clone()));
        BridgeError::ConnectionLost { message }
    }

    fn violate(&mut self, message: impl Into<String>) -> BridgeError {
        let message = message.into();
        tracing::warn!(error = %message, "Protocol violation, resetting connection");
        self.teardown(ConnectionState::Failed, Some(message.clone()));
        BridgeError::ProtocolViolation { message }
    }

    /// Returns `true` if the peer has closed an otherwise idle link.
    async fn peer_closed(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return true;
        };
        if link.reader.has_buffered() {
            return false;
        }
        let mut probe = [0u8; 1];
        match tokio::time::timeout(PROBE_WINDOW, link.reader.get_mut().peek(&mut probe)).await {
            Ok(Ok(0) | Err(_)) => true,
            Ok(Ok(_)) | Err(_) => false,
        }
    }

    /// Makes sure a usable link exists, reconnecting once if needed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` if no link can be established.
    pub(crate) async fn ensure_link(&mut self) -> BridgeResult<()> {
        if self.link.is_some() {
            if self.write_pending {
                tracing::debug!("Previous request was interrupted mid-write, dropping link");
                self.teardown(
                    ConnectionState::Failed,
                    Some("previous write interrupted".to_string()),
                );
            } else if self.peer_closed().await {
                tracing::info!(host = %self.host, port = self.port, "CAD host closed the connection");
                self.teardown(
                    ConnectionState::Failed,
                    Some("host closed the connection".to_string()),
                );
            }
        }

        if self.link.is_none() && self.establish().await != ConnectionState::Connected {
            let detail = self.last_error.clone().unwrap_or_default();
            return Err(BridgeError::unavailable(format!(
                "cannot reach CAD host at {}:{}: {detail}",
                self.host, self.port
            )));
        }
        Ok(())
    }

    /// Sends one command and waits for its response.
    ///
    /// A missing or dead link gets exactly one reconnect attempt before the
    /// command is written; if that fails nothing is sent and the error is
    /// `ServiceUnavailable`. Dropping the returned future abandons the
    /// request: its response is discarded if it arrives later.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable`, `Timeout`, `ConnectionLost` or
    /// `ProtocolViolation`. A host-side error is a successful exchange and is
    /// returned as a failed [`ResultEnvelope`].
    pub async fn send(
        &mut self,
        envelope: &CommandEnvelope,
        timeout: Duration,
    ) -> BridgeResult<ResultEnvelope> {
        self.ensure_link().await?;
        let frame = encode_command(envelope)
            .map_err(|e| BridgeError::invalid_params(format!("unserialisable parameters: {e}")))?;

        if let Ok(result) = tokio::time::timeout(timeout, self.exchange(envelope.id(), &frame)).await
        {
            result
        } else {
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                id = envelope.id(),
                command = envelope.command(),
                timeout_ms,
                "CAD host did not respond in time"
            );
            self.last_error = Some(format!("request timed out after {timeout_ms} ms"));
            self.publish();
            Err(BridgeError::Timeout { timeout_ms })
        }
    }

    async fn exchange(&mut self, id: &str, frame: &[u8]) -> BridgeResult<ResultEnvelope> {
        let framing = self.framing;
        self.outstanding.push_back(id.to_string());
        self.write_pending = true;

        let written = match self.link.as_mut() {
            Some(link) => write_frame(&mut link.writer, framing, frame).await,
            None => return Err(BridgeError::unavailable("no connection")),
        };
        if let Err(e) = written {
            return Err(self.lose(format!("write failed: {e}")));
        }
        self.write_pending = false;
        self.requests_sent += 1;
        self.publish();

        loop {
            let read = match self.link.as_mut() {
                Some(link) => link.reader.read_frame().await,
                None => return Err(BridgeError::ConnectionLost {
                    message: "link dropped".to_string(),
                }),
            };

            let bytes = match read {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Err(self.lose("host closed the connection")),
                Err(FrameError::Io(e)) => return Err(self.lose(format!("read failed: {e}"))),
                Err(e @ FrameError::Truncated { .. }) => return Err(self.lose(e.to_string())),
                Err(e @ FrameError::TooLarge { .. }) => return Err(self.violate(e.to_string())),
            };

            let response = match decode_response(&bytes) {
                Ok(response) => response,
                Err(e) => {
                    let err = BridgeError::from(e);
                    return Err(self.violate(err.to_string()));
                }
            };

            match self.outstanding.front() {
                Some(front) if *front == response.id => {
                    self.outstanding.pop_front();
                    if response.id == id {
                        self.publish();
                        return Ok(response);
                    }
                    tracing::debug!(id = %response.id, "Discarding response to abandoned request");
                }
                front => {
                    let expected = front.cloned().unwrap_or_default();
                    return Err(self.violate(format!(
                        "response id '{}' does not match oldest outstanding request '{expected}'",
                        response.id
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::codec::{decode_command, encode_response};
    use serde_json::{json, Map};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn echo_host() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half, Framing::Lines);
            while let Ok(Some(frame)) = reader.read_frame().await {
                let command = decode_command(&frame).unwrap();
                let mut payload = Map::new();
                payload.insert("echo".to_string(), json!(command.command()));
                let response = ResultEnvelope::success(command.id(), payload);
                let bytes = encode_response(&response).unwrap();
                write_frame(&mut write_half, Framing::Lines, &bytes)
                    .await
                    .unwrap();
            }
        });
        (port, handle)
    }

    #[tokio::test]
    async fn connect_and_send() {
        let (port, _host) = echo_host().await;
        let mut manager = ConnectionManager::new(
            "127.0.0.1",
            port,
            Framing::Lines,
            Duration::from_secs(1),
        );
        let status = manager.subscribe();
        assert_eq!(manager.reconnect().await, ConnectionState::Connected);
        assert_eq!(status.borrow().generation, 1);

        let envelope = CommandEnvelope::new("ping", Map::new());
        let response = manager
            .send(&envelope, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.id, envelope.id());
        assert_eq!(response.payload["echo"], "ping");
        assert_eq!(manager.snapshot().requests_sent, 1);
        assert_eq!(manager.snapshot().outstanding, 0);
    }

    #[tokio::test]
    async fn unreachable_host_is_service_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut manager = ConnectionManager::new(
            "127.0.0.1",
            port,
            Framing::Lines,
            Duration::from_millis(500),
        );
        let err = manager
            .send(
                &CommandEnvelope::new("ping", Map::new()),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ServiceUnavailable { .. }));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(manager.snapshot().connect_attempts, 1);
        assert_eq!(manager.snapshot().requests_sent, 0);
    }

    #[tokio::test]
    async fn garbage_frame_is_protocol_violation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream.write_all(b"this is not json\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut manager = ConnectionManager::new(
            "127.0.0.1",
            port,
            Framing::Lines,
            Duration::from_secs(1),
        );
        let err = manager
            .send(
                &CommandEnvelope::new("ping", Map::new()),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation { .. }));
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn close_resets_state() {
        let (port, _host) = echo_host().await;
        let mut manager = ConnectionManager::new(
            "127.0.0.1",
            port,
            Framing::Lines,
            Duration::from_secs(1),
        );
        manager.reconnect().await;
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Unconnected);
        assert_eq!(manager.snapshot().outstanding, 0);
    }
}
