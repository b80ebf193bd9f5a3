//! Mode selector: the bridge's operating-mode state machine.
//!
//! ```text
//!            N consecutive failures            N consecutive failures
//!   Simulated <---------------------- Live ----------------------> Degraded
//!      |       (simulation fallback)   ^    (no fallback)             |
//!      |                               |                              |
//!      +---------- successful health check / re-probe ----------------+
//! ```
//!
//! The selector does no I/O. Callers feed it outcomes and publish the
//! transitions it returns.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Operating mode of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Commands are forwarded to the host.
    Live,
    /// Commands are answered by the in-memory simulator.
    Simulated,
    /// Commands are refused with `ServiceUnavailable`.
    Degraded,
}

impl Mode {
    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::Simulated => "Simulated",
            Self::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mode change. Every change produces one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTransition {
    /// Previous mode.
    pub from: Mode,
    /// New mode.
    pub to: Mode,
    /// Why the mode changed.
    pub reason: String,
    /// When it changed.
    pub at: DateTime<Utc>,
}

/// Tunable transition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    /// Consecutive failures that take the bridge out of Live.
    pub failure_threshold: u32,
    /// Fall back to Simulated instead of Degraded.
    pub simulation_fallback: bool,
    /// Minimum time between re-probes while not Live.
    pub reprobe_interval: Duration,
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            simulation_fallback: false,
            reprobe_interval: Duration::from_secs(5),
        }
    }
}

/// The mode state machine.
#[derive(Debug, Clone)]
pub struct ModeSelector {
    mode: Mode,
    policy: ModePolicy,
    consecutive_failures: u32,
    forced: bool,
    last_probe: Option<Instant>,
}

impl ModeSelector {
    /// Chooses the initial mode from the outcome of the startup connection
    /// attempt.
    #[must_use]
    pub fn initial(policy: ModePolicy, connected: bool, force_simulation: bool) -> Self {
        let mode = if force_simulation {
            Mode::Simulated
        } else if connected {
            Mode::Live
        } else if policy.simulation_fallback {
            Mode::Simulated
        } else {
            Mode::Degraded
        };
        Self {
            mode,
            policy,
            consecutive_failures: 0,
            forced: force_simulation,
            last_probe: None,
        }
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Transition policy.
    #[must_use]
    pub const fn policy(&self) -> &ModePolicy {
        &self.policy
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns `true` if simulation is forced.
    #[must_use]
    pub const fn is_forced(&self) -> bool {
        self.forced
    }

    fn transition(&mut self, to: Mode, reason: impl Into<String>) -> Option<ModeTransition> {
        if self.mode == to {
            return None;
        }
        let transition = ModeTransition {
            from: self.mode,
            to,
            reason: reason.into(),
            at: Utc::now(),
        };
        self.mode = to;
        Some(transition)
    }

    /// Records a successful exchange with the host.
    ///
    /// Resets the failure counter and, unless simulation is forced, returns
    /// the bridge to Live.
    pub fn record_success(&mut self, reason: &str) -> Option<ModeTransition> {
        self.consecutive_failures = 0;
        if self.forced {
            return None;
        }
        self.transition(Mode::Live, reason)
    }

    /// Records a failed exchange with the host.
    ///
    /// Leaves Live once the failure threshold is reached.
    pub fn record_failure(&mut self, reason: &str) -> Option<ModeTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.mode != Mode::Live || self.consecutive_failures < self.policy.failure_threshold {
            return None;
        }
        let to = if self.policy.simulation_fallback {
            Mode::Simulated
        } else {
            Mode::Degraded
        };
        let reason = format!(
            "{} consecutive failures (last: {reason})",
            self.consecutive_failures
        );
        self.transition(to, reason)
    }

    /// Pins the mode to Simulated, or releases the pin.
    ///
    /// Releasing leaves the bridge out of Live until the next successful
    /// re-probe.
    pub fn force_simulation(&mut self, enabled: bool) -> Option<ModeTransition> {
        self.forced = enabled;
        if enabled {
            self.transition(Mode::Simulated, "simulation forced")
        } else {
            self.last_probe = None;
            let to = if self.policy.simulation_fallback {
                Mode::Simulated
            } else {
                Mode::Degraded
            };
            self.transition(to, "simulation override released")
        }
    }

    /// Returns `true` if a re-probe of the host should run now.
    #[must_use]
    pub fn reprobe_due(&self, now: Instant) -> bool {
        self.mode != Mode::Live
            && !self.forced
            && self
                .last_probe
                .map_or(true, |at| now.duration_since(at) >= self.policy.reprobe_interval)
    }

    /// Notes that a re-probe ran at `now`.
    pub fn note_probe(&mut self, now: Instant) {
        self.last_probe = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(fallback: bool) -> ModePolicy {
        ModePolicy {
            failure_threshold: 3,
            simulation_fallback: fallback,
            reprobe_interval: Duration::from_secs(5),
        }
    }

    #[test]
    fn initial_mode() {
        assert_eq!(
            ModeSelector::initial(policy(false), true, false).mode(),
            Mode::Live
        );
        assert_eq!(
            ModeSelector::initial(policy(false), false, false).mode(),
            Mode::Degraded
        );
        assert_eq!(
            ModeSelector::initial(policy(true), false, false).mode(),
            Mode::Simulated
        );
        assert_eq!(
            ModeSelector::initial(policy(false), true, true).mode(),
            Mode::Simulated
        );
    }

    #[test]
    fn threshold_leaves_live_exactly_once() {
        let mut selector = ModeSelector::initial(policy(false), true, false);
        assert!(selector.record_failure("timeout").is_none());
        assert!(selector.record_failure("timeout").is_none());
        let transition = selector.record_failure("timeout").unwrap();
        assert_eq!(transition.from, Mode::Live);
        assert_eq!(transition.to, Mode::Degraded);
        assert!(transition.reason.contains("3 consecutive failures"));
        assert!(selector.record_failure("timeout").is_none());
        assert_eq!(selector.mode(), Mode::Degraded);
    }

    #[test]
    fn fallback_goes_to_simulated() {
        let mut selector = ModeSelector::initial(policy(true), true, false);
        for _ in 0..3 {
            selector.record_failure("connection lost");
        }
        assert_eq!(selector.mode(), Mode::Simulated);
    }

    #[test]
    fn success_resets_counter() {
        let mut selector = ModeSelector::initial(policy(false), true, false);
        selector.record_failure("timeout");
        selector.record_failure("timeout");
        assert!(selector.record_success("ok").is_none());
        assert_eq!(selector.consecutive_failures(), 0);
        selector.record_failure("timeout");
        assert_eq!(selector.mode(), Mode::Live);
    }

    #[test]
    fn recovery_returns_to_live() {
        let mut selector = ModeSelector::initial(policy(false), false, false);
        let transition = selector.record_success("health check passed").unwrap();
        assert_eq!(transition.from, Mode::Degraded);
        assert_eq!(transition.to, Mode::Live);
    }

    #[test]
    fn forced_simulation_never_goes_live() {
        let mut selector = ModeSelector::initial(policy(false), true, true);
        assert!(selector.record_success("ok").is_none());
        assert_eq!(selector.mode(), Mode::Simulated);
        assert!(!selector.reprobe_due(Instant::now()));

        let transition = selector.force_simulation(false).unwrap();
        assert_eq!(transition.to, Mode::Degraded);
        assert!(selector.reprobe_due(Instant::now()));
    }

    #[test]
    fn reprobe_is_rate_limited() {
        let mut selector = ModeSelector::initial(policy(false), false, false);
        let start = Instant::now();
        assert!(selector.reprobe_due(start));
        selector.note_probe(start);
        assert!(!selector.reprobe_due(start + Duration::from_secs(1)));
        assert!(selector.reprobe_due(start + Duration::from_secs(5)));
    }

    #[test]
    fn live_never_reprobes() {
        let selector = ModeSelector::initial(policy(false), true, false);
        assert!(!selector.reprobe_due(Instant::now()));
    }
}
