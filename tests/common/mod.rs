//! Shared fixtures: a scripted stand-in for the CAD host plugin.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cad_bridge_mcp::bridge::codec::{decode_command, encode_response, write_frame, FrameReader};
use cad_bridge_mcp::bridge::{CommandEnvelope, Framing, ResultEnvelope};
use cad_bridge_mcp::config::Config;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Command the bridge uses for health checks by default.
pub const HEALTH_COMMAND: &str = "get_design_info";

/// How the fake host answers the next scripted command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `status: success` with this payload.
    Success(Value),
    /// `status: error` with this message.
    Reject(&'static str),
    /// Waits, then answers as the inner reply.
    Delay(Duration, Box<Reply>),
    /// Success under an id the bridge never sent.
    WrongId,
    /// A line that is not JSON.
    Garbage,
    /// Drops the connection without answering.
    Close,
}

impl Reply {
    pub fn success(payload: Value) -> Self {
        Self::Success(payload)
    }

    pub fn delayed(millis: u64, inner: Self) -> Self {
        Self::Delay(Duration::from_millis(millis), Box::new(inner))
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Reply>>,
    received: Mutex<Vec<CommandEnvelope>>,
    document: Mutex<String>,
    accepted: AtomicUsize,
}

/// A TCP listener on 127.0.0.1 that speaks the bridge's line framing.
///
/// Health checks are always answered with the current document name. Every
/// other command consumes the next scripted reply; with the script empty it
/// gets an empty success.
pub struct FakeHost {
    port: u16,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl FakeHost {
    pub async fn start() -> Self {
        Self::start_on(0).await
    }

    /// Binds a specific port, for bringing a host back after [`stop`](Self::stop).
    pub async fn start_on(port: u16) -> Self {
        Self::with_shared(port, Arc::new(Shared::default())).await
    }

    async fn with_shared(port: u16, shared: Arc<Shared>) -> Self {
        {
            let mut document = shared.document.lock().unwrap();
            if document.is_empty() {
                *document = "Untitled".to_string();
            }
        }
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        Self { port, shared, task }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Config pointing at this host, with short timeouts and no session file.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.bridge.host = "127.0.0.1".to_string();
        config.bridge.port = self.port;
        config.bridge.connect_timeout_ms = 500;
        config.bridge.request_timeout_ms = 500;
        config.bridge.health_check_interval_secs = None;
        config.session.persistence_path = None;
        config
    }

    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.shared.script.lock().unwrap().extend(replies);
    }

    pub fn set_document(&self, name: &str) {
        *self.shared.document.lock().unwrap() = name.to_string();
    }

    /// Commands received so far, health checks excluded.
    pub fn received(&self) -> Vec<CommandEnvelope> {
        self.shared
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command() != HEALTH_COMMAND)
            .cloned()
            .collect()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Closes the listener and every open connection.
    pub async fn stop(self) -> u16 {
        self.task.abort();
        let _ = self.task.await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.port
    }
}

/// Binds and releases a port so nothing listens on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut connections = tokio::task::JoinSet::new();
    while let Ok((stream, _)) = listener.accept().await {
        shared.accepted.fetch_add(1, Ordering::SeqCst);
        connections.spawn(serve(stream, Arc::clone(&shared)));
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half, Framing::Lines);

    while let Ok(Some(frame)) = reader.read_frame().await {
        let Ok(command) = decode_command(&frame) else {
            return;
        };
        shared.received.lock().unwrap().push(command.clone());

        let reply = if command.command() == HEALTH_COMMAND {
            let document = shared.document.lock().unwrap().clone();
            Reply::Success(json!({"design_name": document}))
        } else {
            let next = shared.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Reply::Success(json!({})))
        };

        let bytes = match settle(reply).await {
            Reply::Success(payload) => encoded(command.id(), payload),
            Reply::Reject(message) => serde_json::to_vec(&json!({
                "id": command.id(),
                "status": "error",
                "error": message,
            }))
            .unwrap(),
            Reply::WrongId => encoded("not-a-request-id", json!({})),
            Reply::Garbage => b"this is not json".to_vec(),
            Reply::Close => {
                let _ = write_half.shutdown().await;
                return;
            }
            Reply::Delay(..) => unreachable!("delays are settled first"),
        };
        if write_frame(&mut write_half, Framing::Lines, &bytes).await.is_err() {
            return;
        }
    }
}

async fn settle(mut reply: Reply) -> Reply {
    loop {
        match reply {
            Reply::Delay(wait, inner) => {
                tokio::time::sleep(wait).await;
                reply = *inner;
            }
            other => return other,
        }
    }
}

fn encoded(id: &str, payload: Value) -> Vec<u8> {
    let payload: Map<String, Value> = match payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    encode_response(&ResultEnvelope::success(id, payload)).unwrap()
}
