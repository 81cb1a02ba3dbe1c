use log::warn;
use tokio::sync::mpsc;

use crate::beacon::Beacon;

/// Presence as seen by the sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresenceState {
    #[default]
    Absent,
    Present,
}

/// Contact sensor reading published for a presence state. A window style
/// sensor reads "contact detected" when closed, so a found beacon opens it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactState {
    Detected,
    NotDetected,
}

impl From<PresenceState> for ContactState {
    fn from(state: PresenceState) -> Self {
        match state {
            PresenceState::Absent => ContactState::Detected,
            PresenceState::Present => ContactState::NotDetected,
        }
    }
}

impl ContactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactState::Detected => "closed",
            ContactState::NotDetected => "open",
        }
    }
}

/// Producer half of the beacon delivery channel.
#[derive(Clone, Debug)]
pub struct BeaconSender {
    tx: mpsc::UnboundedSender<Beacon>,
}

pub type BeaconReceiver = mpsc::UnboundedReceiver<Beacon>;

pub fn delivery_channel() -> (BeaconSender, BeaconReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BeaconSender { tx }, rx)
}

impl BeaconSender {
    /// Hands a beacon to the presence monitor. Returns false when the
    /// monitor has gone away; the beacon is dropped in that case.
    pub fn deliver(&self, beacon: Beacon) -> bool {
        if let Err(err) = self.tx.send(beacon) {
            warn!("Presence monitor gone, dropping beacon: {:?}", err.0);
            return false;
        }
        true
    }
}
