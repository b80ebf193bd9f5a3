//! The session context: one owned object holding all bridge state.
//!
//! A [`Session`] owns the connection manager, the mode selector, the
//! simulator and the design intent store. It is created once, started, shared
//! behind an `Arc` with the dispatcher, the health monitor and the MCP
//! server, and shut down explicitly.
//!
//! # Lifecycle
//!
//! 1. [`Session::new`] builds everything from configuration. No I/O.
//! 2. [`Session::start`] resumes the session file (if configured), makes the
//!    startup connection attempt and health check, and picks the initial mode.
//! 3. [`Session::reset`] clears the design intent and the simulator.
//! 4. [`Session::shutdown`] saves the session file and closes the link.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Instant;

use super::codec::{CommandEnvelope, ResultEnvelope};
use super::connection::{ConnectionManager, ConnectionSnapshot, ConnectionState};
use super::error::{BridgeError, BridgeResult};
use super::mode::{Mode, ModeSelector, ModeTransition};
use super::simulator::MockExecutor;
use crate::config::{BridgeSettings, Config};
use crate::intent::{DesignIntentStore, SessionFile};

/// Capacity of the mode transition channel.
const EVENT_CAPACITY: usize = 32;

/// Read-only report for the mode-query tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Current mode.
    pub mode: Mode,
    /// `true` when Live over a connected link.
    pub healthy: bool,
    /// Simulation is pinned.
    pub forced_simulation: bool,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Failures that take the bridge out of Live.
    pub failure_threshold: u32,
    /// Fallback target when leaving Live.
    pub simulation_fallback: bool,
    /// Connection details.
    pub connection: ConnectionSnapshot,
    /// Open host document, if known.
    pub document: Option<String>,
    /// Entity counts per category.
    pub entities: Map<String, Value>,
    /// Most recent mode change.
    pub last_transition: Option<ModeTransition>,
    /// Session file, if persistence is enabled.
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct DocumentMark {
    name: String,
    generation: u64,
}

#[derive(Debug)]
struct ModeState {
    selector: ModeSelector,
    last_transition: Option<ModeTransition>,
    last_health_check: Option<Instant>,
}

/// Owned bridge state for one design session.
#[derive(Debug)]
pub struct Session {
    settings: BridgeSettings,
    connection: tokio::sync::Mutex<ConnectionManager>,
    status: watch::Receiver<ConnectionSnapshot>,
    mode: Mutex<ModeState>,
    simulator: Mutex<MockExecutor>,
    store: RwLock<DesignIntentStore>,
    session_file: Option<SessionFile>,
    autosave: bool,
    resume: bool,
    document: Mutex<Option<DocumentMark>>,
    events: broadcast::Sender<ModeTransition>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extracts the open document's name from a health check payload.
fn document_name(payload: &Map<String, Value>) -> Option<String> {
    ["design_name", "name", "document"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .or_else(|| {
            payload
                .get("design_info")
                .and_then(|info| info.get("name"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

impl Session {
    /// Builds a session from configuration. Performs no I/O.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let settings = config.bridge.clone();
        let connection = ConnectionManager::new(
            settings.host.clone(),
            settings.port,
            settings.framing,
            settings.connect_timeout(),
        );
        let status = connection.subscribe();
        let selector =
            ModeSelector::initial(settings.mode_policy(), false, settings.force_simulation);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            connection: tokio::sync::Mutex::new(connection),
            status,
            mode: Mutex::new(ModeState {
                selector,
                last_transition: None,
                last_health_check: None,
            }),
            simulator: Mutex::new(MockExecutor::new()),
            store: RwLock::new(DesignIntentStore::with_history_limit(
                config.session.history_limit,
            )),
            session_file: config.session.persistence_path.clone().map(SessionFile::new),
            autosave: config.session.autosave,
            resume: config.session.resume,
            document: Mutex::new(None),
            events,
            settings,
        }
    }

    /// Resumes the session file and selects the initial mode.
    ///
    /// Unless simulation is forced, this makes one connection attempt and, if
    /// it succeeds, one health check. The bridge starts Live only if both
    /// succeed.
    pub async fn start(&self) -> Mode {
        if self.resume {
            if let Some(file) = &self.session_file {
                match file.load_if_exists() {
                    Ok(Some(snapshot)) => {
                        let mut store = self.store.write().await;
                        match store.restore(snapshot) {
                            Ok(()) => tracing::info!(
                                path = %file.path().display(),
                                entities = store.len(),
                                "Resumed design intent from session file"
                            ),
                            Err(e) => tracing::warn!(
                                path = %file.path().display(),
                                error = %e,
                                "Session file rejected, starting empty"
                            ),
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Could not read session file, starting empty"),
                }
            }
        }

        let forced = self.settings.force_simulation;
        let healthy = if forced {
            false
        } else {
            let mut connection = self.connection.lock().await;
            if connection.reconnect().await == ConnectionState::Connected {
                let result = self.health_exchange(&mut connection).await;
                let generation = connection.generation();
                drop(connection);
                match result {
                    Ok(response) => {
                        self.track_document(&response, generation).await;
                        true
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Startup health check failed");
                        false
                    }
                }
            } else {
                false
            }
        };

        let mode = {
            let mut state = lock(&self.mode);
            state.selector = ModeSelector::initial(self.settings.mode_policy(), healthy, forced);
            state.last_health_check = healthy.then(Instant::now);
            state.selector.mode()
        };
        tracing::info!(
            mode = %mode,
            host = %self.settings.host,
            port = self.settings.port,
            forced_simulation = forced,
            "Bridge started"
        );
        mode
    }

    /// Bridge settings.
    #[must_use]
    pub const fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        lock(&self.mode).selector.mode()
    }

    /// Subscribes to mode transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ModeTransition> {
        self.events.subscribe()
    }

    /// Latest connection snapshot. Never waits on an in-flight request.
    #[must_use]
    pub fn connection_snapshot(&self) -> ConnectionSnapshot {
        self.status.borrow().clone()
    }

    /// The design intent store.
    #[must_use]
    pub const fn store(&self) -> &RwLock<DesignIntentStore> {
        &self.store
    }

    pub(crate) const fn connection(&self) -> &tokio::sync::Mutex<ConnectionManager> {
        &self.connection
    }

    /// Answers a command from the simulator.
    pub(crate) fn simulate(&self, envelope: &CommandEnvelope) -> ResultEnvelope {
        lock(&self.simulator).execute(envelope)
    }

    fn publish(&self, state: &mut ModeState, transition: Option<ModeTransition>) {
        let Some(transition) = transition else {
            return;
        };
        if transition.to == Mode::Live {
            tracing::info!(from = %transition.from, to = %transition.to, reason = %transition.reason, "Bridge mode changed");
        } else {
            tracing::warn!(from = %transition.from, to = %transition.to, reason = %transition.reason, "Bridge mode changed");
        }
        state.last_transition = Some(transition.clone());
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(transition);
    }

    /// Records a successful exchange with the host.
    pub fn record_success(&self, reason: &str) {
        let mut state = lock(&self.mode);
        let transition = state.selector.record_success(reason);
        self.publish(&mut state, transition);
    }

    /// Records a failed exchange with the host.
    pub fn record_failure(&self, reason: &str) {
        let mut state = lock(&self.mode);
        let transition = state.selector.record_failure(reason);
        tracing::debug!(
            consecutive_failures = state.selector.consecutive_failures(),
            reason,
            "Host exchange failed"
        );
        self.publish(&mut state, transition);
    }

    /// Pins the bridge to Simulated, or releases the pin.
    pub fn force_simulation(&self, enabled: bool) -> Mode {
        let mut state = lock(&self.mode);
        let transition = state.selector.force_simulation(enabled);
        self.publish(&mut state, transition);
        state.selector.mode()
    }

    async fn health_exchange(
        &self,
        connection: &mut ConnectionManager,
    ) -> BridgeResult<ResultEnvelope> {
        let envelope = CommandEnvelope::new(self.settings.health_check_command.clone(), Map::new());
        connection
            .send(&envelope, self.settings.request_timeout())
            .await
    }

    /// Readies the link for a command.
    ///
    /// A link opened since the last exchange gets a health check before
    /// anything else is sent on it, so a different host document resets the
    /// design intent before names are resolved. Returns `true` when that
    /// reset happened.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUnavailable` when no link can be established, or the
    /// health check's failure on a fresh link.
    pub(crate) async fn prepare_link(
        &self,
        connection: &mut ConnectionManager,
    ) -> BridgeResult<bool> {
        let before = connection.generation();
        connection.ensure_link().await?;
        let generation = connection.generation();
        if generation == before {
            return Ok(false);
        }

        tracing::debug!(generation, "New link to CAD host, checking its document");
        let response = self.health_exchange(connection).await?;
        lock(&self.mode).last_health_check = Some(Instant::now());
        Ok(self.track_document(&response, generation).await)
    }

    /// Folds a health check outcome into the mode selector.
    async fn note_health(&self, result: BridgeResult<ResultEnvelope>, generation: u64) -> bool {
        lock(&self.mode).last_health_check = Some(Instant::now());
        match result {
            Ok(response) => {
                // A host-side error still proves the link works.
                self.track_document(&response, generation).await;
                self.record_success("health check passed");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                if self.settings.count_health_check_failures {
                    self.record_failure(&format!("health check: {e}"));
                }
                false
            }
        }
    }

    /// Re-probes the host: reconnects if asked, runs a health check and
    /// returns to Live on success.
    ///
    /// With simulation forced this does nothing and returns the current mode.
    pub async fn probe(&self, reconnect: bool) -> Mode {
        {
            let mut state = lock(&self.mode);
            if state.selector.is_forced() {
                return state.selector.mode();
            }
            state.selector.note_probe(Instant::now());
        }

        let mut connection = self.connection.lock().await;
        let result = if reconnect
            && connection.reconnect().await != ConnectionState::Connected
        {
            let detail = connection.snapshot().last_error.unwrap_or_default();
            Err(BridgeError::unavailable(detail))
        } else {
            self.health_exchange(&mut connection).await
        };
        let generation = connection.generation();
        drop(connection);

        self.note_health(result, generation).await;
        self.mode()
    }

    /// Runs a Live health check unless a command currently holds the link.
    async fn check_health(&self) {
        let Ok(mut connection) = self.connection.try_lock() else {
            tracing::trace!("Link busy, skipping health check");
            return;
        };
        let result = self.health_exchange(&mut connection).await;
        let generation = connection.generation();
        drop(connection);
        self.note_health(result, generation).await;
    }

    /// One health-monitor tick: a periodic check while Live, a bounded
    /// re-probe otherwise.
    pub async fn tick(&self) {
        let now = Instant::now();
        let (mode, reprobe_due, last_check) = {
            let state = lock(&self.mode);
            (
                state.selector.mode(),
                state.selector.reprobe_due(now),
                state.last_health_check,
            )
        };

        if mode == Mode::Live {
            let Some(interval) = self.settings.health_check_interval() else {
                return;
            };
            if last_check.map_or(true, |at| now.duration_since(at) >= interval) {
                self.check_health().await;
            }
        } else if reprobe_due {
            tracing::debug!(mode = %mode, "Re-probing CAD host");
            self.probe(false).await;
        }
    }

    /// Resets the design intent when the host reports a different document
    /// on a new connection.
    async fn track_document(&self, response: &ResultEnvelope, generation: u64) -> bool {
        if !response.is_success() {
            return false;
        }
        let Some(name) = document_name(&response.payload) else {
            return false;
        };

        let changed = {
            let mut mark = lock(&self.document);
            let changed = mark
                .as_ref()
                .is_some_and(|m| m.generation != generation && m.name != name);
            *mark = Some(DocumentMark {
                name: name.clone(),
                generation,
            });
            changed
        };

        if changed {
            tracing::info!(document = %name, "Host document changed, resetting design intent");
            self.store.write().await.clear();
            lock(&self.simulator).reset();
            self.autosave().await;
        }
        changed
    }

    /// Clears the design intent and the simulated design.
    pub async fn reset(&self) {
        self.store.write().await.clear();
        lock(&self.simulator).reset();
        tracing::info!("Design session reset");
        self.autosave().await;
    }

    /// Deletes the configured session file. Returns its path, or `None`
    /// when persistence is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete_session_file(&self) -> BridgeResult<Option<PathBuf>> {
        let Some(file) = &self.session_file else {
            return Ok(None);
        };
        file.remove()?;
        tracing::info!(path = %file.path().display(), "Session file deleted");
        Ok(Some(file.path().to_path_buf()))
    }

    /// Saves the session file if autosave is enabled.
    pub async fn autosave(&self) {
        if !self.autosave {
            return;
        }
        if let Some(file) = &self.session_file {
            let snapshot = self.store.read().await.snapshot();
            if let Err(e) = file.save(&snapshot) {
                tracing::warn!(error = %e, "Autosave failed");
            }
        }
    }

    fn target_file(&self, path: Option<&Path>) -> BridgeResult<SessionFile> {
        match (path, &self.session_file) {
            (Some(path), _) => Ok(SessionFile::new(path)),
            (None, Some(file)) => Ok(file.clone()),
            (None, None) => Err(BridgeError::invalid_params(
                "no session file configured; pass a path",
            )),
        }
    }

    /// Writes the design intent to `path`, or the configured session file.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is known or the write fails.
    pub async fn save_session(&self, path: Option<&Path>) -> BridgeResult<PathBuf> {
        let file = self.target_file(path)?;
        let snapshot = self.store.read().await.snapshot();
        file.save(&snapshot)?;
        tracing::info!(path = %file.path().display(), "Session saved");
        Ok(file.path().to_path_buf())
    }

    /// Replaces the design intent with the contents of `path`, or the
    /// configured session file. Returns the number of entities loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or violates store
    /// invariants; the store is unchanged in that case.
    pub async fn load_session(&self, path: Option<&Path>) -> BridgeResult<usize> {
        let file = self.target_file(path)?;
        let snapshot = file.load()?;
        let mut store = self.store.write().await;
        store.restore(snapshot)?;
        tracing::info!(path = %file.path().display(), entities = store.len(), "Session loaded");
        Ok(store.len())
    }

    /// Status for the mode-query tool.
    pub async fn status(&self) -> BridgeStatus {
        let connection = self.connection_snapshot();
        let entities = self.store.read().await.summary();
        let document = lock(&self.document).as_ref().map(|m| m.name.clone());
        let state = lock(&self.mode);
        let mode = state.selector.mode();
        BridgeStatus {
            mode,
            healthy: mode == Mode::Live && connection.state == ConnectionState::Connected,
            forced_simulation: state.selector.is_forced(),
            consecutive_failures: state.selector.consecutive_failures(),
            failure_threshold: state.selector.policy().failure_threshold,
            simulation_fallback: state.selector.policy().simulation_fallback,
            connection,
            document,
            entities,
            last_transition: state.last_transition.clone(),
            session_file: self.session_file.as_ref().map(|f| f.path().to_path_buf()),
        }
    }

    /// Saves the session file and closes the link.
    pub async fn shutdown(&self) {
        self.autosave().await;
        self.connection.lock().await.close();
        tracing::info!("Bridge session shut down");
    }
}
