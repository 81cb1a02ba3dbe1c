//! Acceptance filter turning raw manufacturer data into [`Beacon`] records.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, trace};
use tokio::time::Instant;

use crate::messages::BeaconSender;
use crate::tlv::{self, NEARBY_TAG};

/// Apple's Bluetooth SIG company identifier, as it appears on the air.
/// https://bitbucket.org/bluetooth-SIG/public/src/main/assigned_numbers/company_identifiers/company_identifiers.yaml
pub const APPLE_COMPANY_ID: [u8; 2] = [0x4C, 0x00];

/// One accepted Apple advertisement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub observed_at: Instant,
    pub rssi: i16,
    pub is_target_type: bool,
    pub tags: BTreeSet<u8>,
}

impl fmt::Display for Beacon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.tags.iter().map(|t| tlv::tag_label(*t)).collect();
        write!(f, "beacon rssi={} dBm types=[{}]", self.rssi, labels.join(", "))
    }
}

/// Classifies one advertisement. Returns `None` unless the vendor prefix is
/// Apple's; value bytes are never inspected beyond their tags.
pub fn filter(vendor_id: &[u8], payload: &[u8], rssi: i16, now: Instant) -> Option<Beacon> {
    if vendor_id != APPLE_COMPANY_ID {
        return None;
    }

    let values = tlv::decode(payload);

    Some(Beacon {
        observed_at: now,
        rssi,
        is_target_type: values.contains(NEARBY_TAG),
        tags: values.tags().collect(),
    })
}

/// One `label=0xvalue` line per decoded entry, ordered by tag.
pub fn describe_entries(payload: &[u8]) -> Vec<String> {
    let mut entries: Vec<(u8, &[u8])> = tlv::decode(payload).iter().collect();
    entries.sort_unstable_by_key(|(tag, _)| *tag);
    entries
        .into_iter()
        .map(|(tag, value)| format!("{}=0x{}", tlv::tag_label(tag), hex::encode(value)))
        .collect()
}

/// Runs [`filter`] on every advertisement and delivers accepted beacons to
/// the presence monitor.
#[derive(Clone, Debug)]
pub struct BeaconFilter {
    beacons: BeaconSender,
    dump_advertisements: bool,
}

impl BeaconFilter {
    pub fn new(beacons: BeaconSender, dump_advertisements: bool) -> Self {
        BeaconFilter {
            beacons,
            dump_advertisements,
        }
    }

    pub fn dumps_advertisements(&self) -> bool {
        self.dump_advertisements
    }

    /// Returns true when a beacon was handed to the monitor.
    pub fn observe(&self, vendor_id: &[u8], payload: &[u8], rssi: i16, now: Instant) -> bool {
        if self.dump_advertisements {
            debug!(
                "Manufacturer data: 0x{}{} rssi={}",
                hex::encode(vendor_id),
                hex::encode(payload),
                rssi
            );
            if vendor_id == APPLE_COMPANY_ID {
                for line in describe_entries(payload) {
                    debug!("  {}", line);
                }
            }
        }

        match filter(vendor_id, payload, rssi, now) {
            Some(beacon) => {
                trace!("Accepted {}", beacon);
                self.beacons.deliver(beacon)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::delivery_channel;

    #[test]
    fn test_rejects_foreign_vendor() {
        let now = Instant::now();
        let payload = [0x10, 0x01, 0x00];
        assert!(filter(&[0x4C, 0x01], &payload, -40, now).is_none());
        assert!(filter(&[0x4D, 0x00], &payload, -40, now).is_none());
        assert!(filter(&[0x00, 0x4C], &payload, -40, now).is_none());
        assert!(filter(&[0x4C], &payload, -40, now).is_none());
        assert!(filter(&[], &payload, -40, now).is_none());
    }

    #[test]
    fn test_classifies_nearby_beacon() {
        let now = Instant::now();
        let beacon = filter(&APPLE_COMPANY_ID, &[0x10, 0x02, 0x01, 0x02, 0x0c, 0x00], -42, now).unwrap();
        assert!(beacon.is_target_type);
        assert_eq!(beacon.tags, BTreeSet::from([0x0c, 0x10]));
        assert_eq!(beacon.rssi, -42);
        assert_eq!(beacon.observed_at, now);
    }

    #[test]
    fn test_other_apple_types_are_not_target() {
        let beacon = filter(&APPLE_COMPANY_ID, &[0x07, 0x01, 0x01], -30, Instant::now()).unwrap();
        assert!(!beacon.is_target_type);
        assert_eq!(beacon.tags, BTreeSet::from([0x07]));

        // Malformed payloads still produce a beacon, just without tags.
        let beacon = filter(&APPLE_COMPANY_ID, &[0x10, 0x09, 0x01], -30, Instant::now()).unwrap();
        assert!(!beacon.is_target_type);
        assert!(beacon.tags.is_empty());
    }

    #[test]
    fn test_display_names_tags() {
        let beacon = filter(&APPLE_COMPANY_ID, &[0x10, 0x00, 0x42, 0x00], -55, Instant::now()).unwrap();
        assert_eq!(beacon.to_string(), "beacon rssi=-55 dBm types=[nearby, 0x42]");
    }

    #[test]
    fn test_describe_entries() {
        assert_eq!(
            describe_entries(&[0x10, 0x02, 0xab, 0xcd, 0x07, 0x00, 0x42, 0x01, 0x09]),
            vec!["airpods=0x", "nearby=0xabcd", "0x42=0x09"]
        );
        assert!(describe_entries(&[0x10]).is_empty());
    }

    #[test]
    fn test_observe_delivers_accepted_beacons() {
        let (tx, mut rx) = delivery_channel();
        let filter = BeaconFilter::new(tx, true);
        let now = Instant::now();

        assert!(!filter.observe(&[0x06, 0x00], &[0x10, 0x00], -40, now));
        assert!(filter.observe(&APPLE_COMPANY_ID, &[0x10, 0x00], -40, now));

        let beacon = rx.try_recv().unwrap();
        assert!(beacon.is_target_type);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_observe_survives_closed_channel() {
        let (tx, rx) = delivery_channel();
        drop(rx);
        let filter = BeaconFilter::new(tx, false);
        assert!(!filter.observe(&APPLE_COMPANY_ID, &[0x10, 0x00], -40, Instant::now()));
    }
}
