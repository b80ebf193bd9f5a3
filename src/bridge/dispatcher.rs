//! Command dispatcher.
//!
//! Resolves entity references, routes the command according to the current
//! mode and applies the command's declared effect to the design intent store
//! before the result is handed back.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use super::codec::{CommandEnvelope, ResultEnvelope};
use super::commands::CommandSpec;
use super::connection::ConnectionManager;
use super::error::{BridgeError, BridgeResult, ErrorKind};
use super::mode::Mode;
use super::session::Session;
use crate::intent::HistoryEntry;

/// Executes commands against the host, the simulator or nothing at all.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
}

/// Outcome of routing one command.
struct Routed {
    mode: Mode,
    id: String,
    result: BridgeResult<ResultEnvelope>,
}

impl Dispatcher {
    /// Creates a dispatcher over a started session.
    #[must_use]
    pub const fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The session this dispatcher works on.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Executes `command` with `parameters`.
    ///
    /// Never fails: every error is reported in the returned envelope.
    pub async fn execute(&self, command: &str, parameters: Map<String, Value>) -> ResultEnvelope {
        self.execute_cancellable(command, parameters, std::future::pending::<()>())
            .await
    }

    /// Executes `command`, giving up with `Cancelled` as soon as `cancel`
    /// completes.
    ///
    /// Cancellation only races the routing step. A request that was already
    /// written is abandoned and its late response is discarded by the
    /// connection manager; once a result is in hand its effect is always
    /// applied.
    pub async fn execute_cancellable<C>(
        &self,
        command: &str,
        parameters: Map<String, Value>,
        cancel: C,
    ) -> ResultEnvelope
    where
        C: Future<Output = ()>,
    {
        let envelope = CommandEnvelope::new(command, parameters);
        let spec = CommandSpec::lookup(envelope.command());
        let routed = tokio::select! {
            biased;
            () = cancel => None,
            routed = self.route(&envelope, &spec) => Some(routed),
        };

        let Some(routed) = routed else {
            tracing::debug!(command, id = envelope.id(), "Command cancelled");
            let error = BridgeError::Cancelled;
            self.record(&envelope, envelope.id(), self.session.mode(), error.kind().as_str())
                .await;
            return ResultEnvelope::failure(envelope.id(), &error);
        };
        self.finish(&envelope, &spec, routed).await
    }

    async fn finish(
        &self,
        envelope: &CommandEnvelope,
        spec: &CommandSpec,
        routed: Routed,
    ) -> ResultEnvelope {
        let Routed { mode, id, result } = routed;
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.record(envelope, &id, mode, error.kind().as_str()).await;
                return ResultEnvelope::failure(id, &error);
            }
        };

        if !response.is_success() {
            let outcome = response.kind().unwrap_or(ErrorKind::HostRejected);
            self.record(envelope, &id, mode, outcome.as_str()).await;
            return response;
        }

        let response = {
            let mut store = self.session.store().write().await;
            let applied = spec.apply(&id, envelope.parameters(), &response.payload, &mut store);
            let (response, outcome) = match applied {
                Ok(()) => (response, "success"),
                Err(error) => {
                    tracing::warn!(
                        command = envelope.command(),
                        error = %error,
                        "Host accepted the command but its effect could not be recorded"
                    );
                    let kind = error.kind().as_str();
                    (ResultEnvelope::failure(id.as_str(), &error), kind)
                }
            };
            store.record_history(history_entry(envelope, &id, mode, outcome));
            response
        };

        if spec.mutates() {
            self.session.autosave().await;
        }
        response
    }

    /// Resolves the command's entity references against the store as of the
    /// last completed command.
    async fn check(&self, envelope: &CommandEnvelope, spec: &CommandSpec) -> BridgeResult<()> {
        let checked = spec.check(envelope.parameters(), &*self.session.store().read().await);
        if let Err(error) = &checked {
            tracing::debug!(command = envelope.command(), error = %error, "Reference check failed");
        }
        checked
    }

    async fn route(&self, envelope: &CommandEnvelope, spec: &CommandSpec) -> Routed {
        loop {
            let mode = self.session.mode();
            match mode {
                Mode::Live => {
                    let mut connection = self.session.connection().lock().await;
                    // The request ahead of this one may have ended Live.
                    if self.session.mode() != Mode::Live {
                        continue;
                    }
                    let (id, result) = self.send_live(&mut connection, envelope, spec).await;
                    return Routed { mode, id, result };
                }
                Mode::Simulated => {
                    let result = self
                        .check(envelope, spec)
                        .await
                        .map(|()| self.session.simulate(envelope));
                    return Routed {
                        mode,
                        id: envelope.id().to_string(),
                        result,
                    };
                }
                Mode::Degraded => {
                    let settings = self.session.settings();
                    let result = self.check(envelope, spec).await.and_then(|()| {
                        Err(BridgeError::unavailable(format!(
                            "CAD host at {}:{} is unreachable",
                            settings.host, settings.port
                        )))
                    });
                    return Routed {
                        mode,
                        id: envelope.id().to_string(),
                        result,
                    };
                }
            }
        }
    }

    /// Sends with retry. Only a timeout or a protocol violation is retried,
    /// each time under a fresh correlation id.
    ///
    /// Every attempt first readies the link and then resolves references, so
    /// a reconnect to a different host document is noticed before any name
    /// from the previous document is used.
    async fn send_live(
        &self,
        connection: &mut ConnectionManager,
        envelope: &CommandEnvelope,
        spec: &CommandSpec,
    ) -> (String, BridgeResult<ResultEnvelope>) {
        let settings = self.session.settings();
        let timeout = settings.request_timeout();
        let mut retries_left = settings.retry_attempts;
        let mut attempt = envelope.clone();

        loop {
            let prepared = match self.session.prepare_link(connection).await {
                Ok(_) => self.check(&attempt, spec).await,
                Err(error) => {
                    self.note_failure(&attempt, &error);
                    Err(error)
                }
            };
            if let Err(error) = prepared {
                return (attempt.id().to_string(), Err(error));
            }

            match connection.send(&attempt, timeout).await {
                Ok(response) => {
                    self.session
                        .record_success(&format!("{} answered", attempt.command()));
                    return (attempt.id().to_string(), Ok(response));
                }
                Err(error) => {
                    self.note_failure(&attempt, &error);
                    let kind = error.kind();
                    let retryable = matches!(kind, ErrorKind::Timeout | ErrorKind::ProtocolViolation);
                    if retryable && retries_left > 0 && self.session.mode() == Mode::Live {
                        retries_left -= 1;
                        tracing::info!(
                            command = attempt.command(),
                            error = %error,
                            "Retrying with a fresh correlation id"
                        );
                        attempt = attempt.with_fresh_id();
                        continue;
                    }
                    return (attempt.id().to_string(), Err(error));
                }
            }
        }
    }

    fn note_failure(&self, attempt: &CommandEnvelope, error: &BridgeError) {
        if error.kind().is_connection_failure() {
            self.session
                .record_failure(&format!("{}: {error}", attempt.command()));
        }
    }

    async fn record(&self, envelope: &CommandEnvelope, id: &str, mode: Mode, outcome: &str) {
        self.session
            .store()
            .write()
            .await
            .record_history(history_entry(envelope, id, mode, outcome));
    }
}

fn history_entry(envelope: &CommandEnvelope, id: &str, mode: Mode, outcome: &str) -> HistoryEntry {
    HistoryEntry {
        command_id: id.to_string(),
        command: envelope.command().to_string(),
        parameters: envelope.parameters().clone(),
        outcome: outcome.to_string(),
        mode: mode.as_str().to_string(),
        recorded_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::intent::Category;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn simulated() -> Dispatcher {
        let mut config = Config::default();
        config.bridge.force_simulation = true;
        let session = Arc::new(Session::new(&config));
        session.start().await;
        Dispatcher::new(session)
    }

    #[tokio::test]
    async fn created_sketch_is_recorded_before_return() {
        let dispatcher = simulated().await;
        let response = dispatcher
            .execute("create_sketch", params(json!({"plane": "XZ"})))
            .await;
        assert!(response.is_success());
        let name = response.payload["sketch_name"].as_str().unwrap().to_string();

        let store = dispatcher.session().store().read().await;
        assert!(store.contains(&name, Category::Sketch));
        assert_eq!(store.history(None, None).len(), 1);
    }

    #[tokio::test]
    async fn unknown_reference_never_reaches_the_simulator() {
        let dispatcher = simulated().await;
        let response = dispatcher
            .execute(
                "draw_circle",
                params(json!({"sketch_name": "Ghost", "radius": 2.0})),
            )
            .await;
        assert_eq!(response.kind(), Some(ErrorKind::UnknownEntity));

        let history = dispatcher.session().store().read().await;
        let entries = history.history(None, None);
        assert_eq!(entries[0].outcome, "UnknownEntity");
    }

    #[tokio::test]
    async fn duplicate_requested_name_is_rejected() {
        let dispatcher = simulated().await;
        let first = dispatcher
            .execute("create_sketch", params(json!({"name": "Base"})))
            .await;
        assert!(first.is_success());
        let second = dispatcher
            .execute("create_sketch", params(json!({"name": "Base"})))
            .await;
        assert_eq!(second.kind(), Some(ErrorKind::DuplicateEntity));
    }

    #[tokio::test]
    async fn degraded_refuses_without_network() {
        // Never started: the bridge sits in Degraded with no connection.
        let session = Arc::new(Session::new(&Config::default()));
        let dispatcher = Dispatcher::new(Arc::clone(&session));
        let response = dispatcher.execute("get_design_info", Map::new()).await;
        assert_eq!(response.kind(), Some(ErrorKind::ServiceUnavailable));
        assert_eq!(session.connection_snapshot().connect_attempts, 0);
    }

    #[tokio::test]
    async fn cancellation_wins_when_ready() {
        let dispatcher = simulated().await;
        let response = dispatcher
            .execute_cancellable("get_design_info", Map::new(), std::future::ready(()))
            .await;
        assert_eq!(response.kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn cancel_after_routing_still_records_the_effect() {
        let dispatcher = Arc::new(simulated().await);
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();

        // Holding a read lock parks the command in its store update.
        let guard = dispatcher.session().store().read().await;
        let task = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                dispatcher
                    .execute_cancellable(
                        "create_sketch",
                        params(json!({"name": "Late"})),
                        async move {
                            let _ = cancel_rx.await;
                        },
                    )
                    .await
            }
        });
        while !cancel_tx.is_closed() {
            tokio::task::yield_now().await;
        }
        let _ = cancel_tx.send(());
        drop(guard);

        let response = task.await.unwrap();
        assert!(response.is_success());
        let store = dispatcher.session().store().read().await;
        assert!(store.contains("Late", Category::Sketch));
        let history = store.history(None, None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, "success");
    }

    #[tokio::test]
    async fn host_rejection_is_returned_verbatim() {
        let dispatcher = simulated().await;
        let response = dispatcher.execute("launch_rocket", Map::new()).await;
        assert_eq!(response.kind(), Some(ErrorKind::HostRejected));
        assert_eq!(response.error.as_deref(), Some("Unknown command: launch_rocket"));
    }
}
