//! Watch loop
//!
//! Drives reconciliation passes on an interval. Failed passes move the loop
//! into backoff; successful ones reset it. Cancellation stops the loop from
//! any state, and a pass in flight finishes its current call first.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::error::ControllerError;
use crate::reconcile::Reconciler;
use crate::types::Outcome;

/// Transitions kept in the report
const MAX_TRANSITIONS: usize = 100;

/// Watch loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchState {
    Idle,
    Polling,
    Backoff,
    Stopped,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchState::Idle => "idle",
            WatchState::Polling => "polling",
            WatchState::Backoff => "backoff",
            WatchState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State transition record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub timestamp: DateTime<Utc>,
    pub from_state: WatchState,
    pub to_state: WatchState,
    pub reason: String,
}

/// Summary of a finished watch loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchReport {
    pub passes: u64,
    pub failures: u64,
    pub last_outcome: Option<Outcome>,
    /// Most recent transitions, oldest first
    pub transitions: VecDeque<StateTransition>,
}

impl WatchReport {
    /// Whether the loop ever entered `state`
    pub fn visited(&self, state: WatchState) -> bool {
        self.transitions.iter().any(|t| t.to_state == state)
    }
}

/// Timing for the watch loop
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub interval: Duration,
    pub backoff: Backoff,
}

/// The reconciliation state machine
pub struct WatchLoop {
    reconciler: Reconciler,
    settings: WatchSettings,
    cancel: CancellationToken,
    state: WatchState,
    report: WatchReport,
}

impl WatchLoop {
    pub fn new(reconciler: Reconciler, settings: WatchSettings, cancel: CancellationToken) -> Self {
        Self {
            reconciler,
            settings,
            cancel,
            state: WatchState::Idle,
            report: WatchReport::default(),
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Run until cancelled
    pub async fn run(mut self) -> WatchReport {
        self.transition(WatchState::Polling, "start");
        let mut delay = Duration::ZERO;

        loop {
            match self.state {
                WatchState::Idle => {
                    let interval = self.settings.interval;
                    if self.sleep(interval).await {
                        self.transition(WatchState::Polling, "interval elapsed");
                    } else {
                        self.transition(WatchState::Stopped, "cancelled");
                    }
                }
                WatchState::Polling => {
                    let outcome = self.reconciler.run_pass(&self.cancel).await;
                    if outcome == Outcome::Failed(ControllerError::Cancelled) {
                        self.transition(WatchState::Stopped, "cancelled");
                        continue;
                    }
                    self.report.passes += 1;

                    match &outcome {
                        Outcome::Failed(e) => {
                            self.report.failures += 1;
                            delay = self.settings.backoff.next_delay();
                            let reason = format!("{} (retry in {:?})", e, delay);
                            self.transition(WatchState::Backoff, &reason);
                        }
                        other => {
                            self.settings.backoff.reset();
                            let reason = other.to_string();
                            self.transition(WatchState::Idle, &reason);
                        }
                    }
                    self.report.last_outcome = Some(outcome);
                }
                WatchState::Backoff => {
                    if self.sleep(delay).await {
                        self.transition(WatchState::Polling, "backoff elapsed");
                    } else {
                        self.transition(WatchState::Stopped, "cancelled");
                    }
                }
                WatchState::Stopped => break,
            }
        }

        info!(passes = self.report.passes, failures = self.report.failures, "watch loop stopped");
        self.report
    }

    /// Sleep unless cancelled first; false when cancelled
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn transition(&mut self, to_state: WatchState, reason: &str) {
        debug!(from = %self.state, to = %to_state, reason, "watch transition");

        if self.report.transitions.len() == MAX_TRANSITIONS {
            self.report.transitions.pop_front();
        }
        self.report.transitions.push_back(StateTransition {
            timestamp: Utc::now(),
            from_state: self.state,
            to_state,
            reason: reason.to_string(),
        });
        self.state = to_state;
    }
}

/// Run exactly one pass; never backs off
pub async fn run_once(reconciler: &Reconciler, cancel: &CancellationToken) -> Outcome {
    reconciler.run_pass(cancel).await
}
