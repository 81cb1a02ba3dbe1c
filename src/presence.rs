//! Presence debouncing.
//!
//! [`PresenceMachine`] is the pure state machine: it is fed beacons and timer
//! expiries together with the evaluation instant and reports transitions.
//! [`PresenceMonitor`] owns a machine and drives it from the delivery channel
//! and a resettable hold deadline.

use std::fmt;
use std::future::Future;

use log::{debug, info, trace};
use tokio::time::{self, Duration, Instant};

use crate::beacon::Beacon;
use crate::config::PresenceSettings;
use crate::messages::{BeaconReceiver, PresenceState};

/// Why a beacon did not count towards presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotTarget,
    TooWeak { rssi: i16, threshold: i16 },
    Stale { age: Duration },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotTarget => f.write_str("not a nearby beacon"),
            Rejection::TooWeak { rssi, threshold } => {
                write!(f, "rssi {} dBm below threshold {} dBm", rssi, threshold)
            }
            Rejection::Stale { age } => write!(f, "observed {:?} ago", age),
        }
    }
}

pub struct PresenceMachine {
    settings: PresenceSettings,
    state: PresenceState,
    /// End of the hold window; armed only while present.
    deadline: Option<Instant>,
}

impl PresenceMachine {
    pub fn new(settings: PresenceSettings) -> Self {
        PresenceMachine {
            settings,
            state: PresenceState::Absent,
            deadline: None,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn qualify(&self, beacon: &Beacon, now: Instant) -> Result<(), Rejection> {
        if !beacon.is_target_type {
            return Err(Rejection::NotTarget);
        }
        if beacon.rssi < self.settings.threshold {
            return Err(Rejection::TooWeak {
                rssi: beacon.rssi,
                threshold: self.settings.threshold,
            });
        }
        // A beacon whose own hold window has already closed can't hold
        // presence either.
        let age = now.saturating_duration_since(beacon.observed_at);
        if age > self.settings.recency_window || age >= self.settings.hold {
            return Err(Rejection::Stale { age });
        }
        Ok(())
    }

    /// Applies a beacon and returns the transitions it caused, in order.
    ///
    /// A hold window that ran out before the beacon was observed is closed
    /// first, so a backlog can yield `[Absent, Present]`.
    pub fn on_beacon(&mut self, beacon: &Beacon, now: Instant) -> Vec<PresenceState> {
        let mut transitions: Vec<PresenceState> =
            self.on_timer(beacon.observed_at).into_iter().collect();

        if let Err(rejection) = self.qualify(beacon, now) {
            trace!("Ignoring {}: {}", beacon, rejection);
            return transitions;
        }

        let deadline = beacon.observed_at + self.settings.hold;
        // Out of order delivery must not pull the window in.
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.max(deadline)));

        match self.state {
            PresenceState::Absent => {
                info!("Beacon found, switching sensor to present ({})", beacon);
                self.state = PresenceState::Present;
                transitions.push(PresenceState::Present);
            }
            PresenceState::Present => {
                debug!("Beacon found while present, hold window restarted ({})", beacon);
            }
        }
        transitions
    }

    /// Applies a hold timer tick. Returns the new state if the hold window
    /// has elapsed while present.
    pub fn on_timer(&mut self, now: Instant) -> Option<PresenceState> {
        match (self.state, self.deadline) {
            (PresenceState::Present, Some(deadline)) if now >= deadline => {
                info!("No beacon within {:?}, switching sensor to absent", self.settings.hold);
                self.state = PresenceState::Absent;
                self.deadline = None;
                Some(PresenceState::Absent)
            }
            (PresenceState::Absent, _) => {
                self.deadline = None;
                None
            }
            _ => None,
        }
    }
}

/// Receives presence transitions.
pub trait PresenceSink {
    fn presence_changed(&mut self, state: PresenceState);
}

/// Sink used when no accessory transport is configured.
#[derive(Debug, Default)]
pub struct LogSink {
    pub name: String,
}

impl PresenceSink for LogSink {
    fn presence_changed(&mut self, state: PresenceState) {
        info!("{}: {:?}", self.name, state);
    }
}

pub struct PresenceMonitor {
    machine: PresenceMachine,
    beacons: BeaconReceiver,
}

impl PresenceMonitor {
    pub fn new(settings: PresenceSettings, beacons: BeaconReceiver) -> Self {
        PresenceMonitor {
            machine: PresenceMachine::new(settings),
            beacons,
        }
    }

    /// Runs until `shutdown` resolves, or until the producer is gone and no
    /// hold window is pending. Returns the final state.
    pub async fn run<S, F>(mut self, sink: &mut S, shutdown: F) -> PresenceState
    where
        S: PresenceSink + ?Sized,
        F: Future<Output = ()>,
    {
        let hold_timer = time::sleep_until(Instant::now());
        tokio::pin!(hold_timer);
        tokio::pin!(shutdown);

        let mut armed = None;
        let mut producer_open = true;

        loop {
            let deadline = self.machine.deadline();
            if deadline != armed {
                if let Some(deadline) = deadline {
                    hold_timer.as_mut().reset(deadline);
                }
                armed = deadline;
            }

            if !producer_open && armed.is_none() {
                debug!("Beacon producer closed, monitor exiting");
                break;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("Shutdown requested, monitor exiting");
                    break;
                }
                beacon = self.beacons.recv(), if producer_open => match beacon {
                    Some(beacon) => {
                        for state in self.machine.on_beacon(&beacon, Instant::now()) {
                            sink.presence_changed(state);
                        }
                    }
                    None => producer_open = false,
                },
                _ = &mut hold_timer, if armed.is_some() => {
                    if let Some(state) = self.machine.on_timer(Instant::now()) {
                        sink.presence_changed(state);
                    }
                    if self.machine.deadline().is_some() {
                        // Woke early; make sure the deadline is re-armed.
                        armed = None;
                    }
                }
            }
        }

        // A hold window that already ran out still has to be reported.
        if let Some(state) = self.machine.on_timer(Instant::now()) {
            sink.presence_changed(state);
        }
        self.machine.state()
    }
}
