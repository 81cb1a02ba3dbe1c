//! Decoder for the tag-length-value sequence carried in Apple manufacturer
//! data.
//!
//! Each entry is one tag byte, one length byte and `length` value bytes.
//! Radio data is often truncated or not TLV at all, so decoding is best
//! effort: the first entry that does not fit ends the scan and everything
//! decoded before it is kept.

use std::collections::HashMap;
use std::fmt;

/// Tag of the "nearby" advertisement, the one that signals presence.
pub const NEARBY_TAG: u8 = 0x10;

/// Decoded tag to value mapping. Values borrow from the source buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaggedValues<'a> {
    entries: HashMap<u8, &'a [u8]>,
}

impl<'a> TaggedValues<'a> {
    pub fn contains(&self, tag: u8) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &'a [u8])> + '_ {
        self.entries.iter().map(|(tag, value)| (*tag, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn decode(data: &[u8]) -> TaggedValues<'_> {
    let mut entries = HashMap::new();
    let mut rest = data;

    while let [tag, len, tail @ ..] = rest {
        let len = *len as usize;
        if len > tail.len() {
            // Would run past the buffer, probably not a TLV.
            break;
        }
        let (value, next) = tail.split_at(len);
        entries.insert(*tag, value);
        rest = next;
    }

    TaggedValues { entries }
}

/// Apple advertisement types, keyed by TLV tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisementType {
    AirPrint,
    AirDrop,
    HomeKit,
    AirPods,
    Siri,
    AirPlay,
    WatchConnection,
    Handoff,
    WifiSettings,
    Hotspot,
    WifiJoin,
    Nearby,
}

impl AdvertisementType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            0x03 => AdvertisementType::AirPrint,
            0x05 => AdvertisementType::AirDrop,
            0x06 => AdvertisementType::HomeKit,
            0x07 => AdvertisementType::AirPods,
            0x08 => AdvertisementType::Siri,
            0x09 => AdvertisementType::AirPlay,
            0x0b => AdvertisementType::WatchConnection,
            0x0c => AdvertisementType::Handoff,
            0x0d => AdvertisementType::WifiSettings,
            0x0e => AdvertisementType::Hotspot,
            0x0f => AdvertisementType::WifiJoin,
            NEARBY_TAG => AdvertisementType::Nearby,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdvertisementType::AirPrint => "airprint",
            AdvertisementType::AirDrop => "airdrop",
            AdvertisementType::HomeKit => "homekit",
            AdvertisementType::AirPods => "airpods",
            AdvertisementType::Siri => "siri",
            AdvertisementType::AirPlay => "airplay",
            AdvertisementType::WatchConnection => "watch_c",
            AdvertisementType::Handoff => "handoff",
            AdvertisementType::WifiSettings => "wifi_set",
            AdvertisementType::Hotspot => "hotspot",
            AdvertisementType::WifiJoin => "wifi_join",
            AdvertisementType::Nearby => "nearby",
        }
    }
}

impl fmt::Display for AdvertisementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human readable tag label for logs, e.g. `nearby` or `0x42`.
pub fn tag_label(tag: u8) -> String {
    match AdvertisementType::from_tag(tag) {
        Some(kind) => kind.to_string(),
        None => format!("{tag:#04x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(data: &[u8]) -> HashMap<u8, Vec<u8>> {
        decode(data)
            .iter()
            .map(|(tag, value)| (tag, value.to_vec()))
            .collect()
    }

    #[test]
    fn test_short_input_is_empty() {
        assert!(decode(&[]).is_empty());
        assert!(decode(&[0x10]).is_empty());
    }

    #[test]
    fn test_decodes_well_formed_sequence() {
        let data = [0x10, 0x02, 0xaa, 0xbb, 0x0c, 0x03, 0x01, 0x02, 0x03, 0x07, 0x01, 0xff];
        let expected = HashMap::from([
            (0x10, vec![0xaa, 0xbb]),
            (0x0c, vec![0x01, 0x02, 0x03]),
            (0x07, vec![0xff]),
        ]);
        assert_eq!(entries(&data), expected);
    }

    #[test]
    fn test_recovers_generated_sequences() {
        let lengths = [0usize, 1, 255, 2, 0, 254, 17, 128, 3, 255, 0, 64];

        for rotation in 0..lengths.len() {
            let mut data = Vec::new();
            let mut expected = HashMap::new();
            for (i, len) in lengths.iter().cycle().skip(rotation).take(lengths.len()).enumerate() {
                let tag = (i as u8).wrapping_mul(37).wrapping_add(rotation as u8);
                let value: Vec<u8> = (0..*len).map(|b| (b as u8) ^ tag).collect();
                data.push(tag);
                data.push(*len as u8);
                data.extend_from_slice(&value);
                expected.insert(tag, value);
            }
            assert_eq!(entries(&data), expected, "rotation {rotation}");
        }
    }

    #[test]
    fn test_value_ending_on_last_byte_is_accepted() {
        assert_eq!(entries(&[0x10, 0x01, 0x42]), HashMap::from([(0x10, vec![0x42])]));
    }

    #[test]
    fn test_zero_length_value() {
        let values = decode(&[0x10, 0x00]);
        assert!(values.contains(0x10));
        assert_eq!(entries(&[0x10, 0x00]), HashMap::from([(0x10, vec![])]));

        assert_eq!(
            entries(&[0x10, 0x00, 0x0c, 0x01, 0x05]),
            HashMap::from([(0x10, vec![]), (0x0c, vec![0x05])])
        );
    }

    #[test]
    fn test_overrunning_entry_is_dropped() {
        // Second entry declares 5 bytes but only 2 remain.
        let data = [0x0c, 0x01, 0x01, 0x10, 0x05, 0xaa, 0xbb];
        assert_eq!(entries(&data), HashMap::from([(0x0c, vec![0x01])]));
        assert!(!decode(&data).contains(0x10));
    }

    #[test]
    fn test_dangling_header_byte_is_ignored() {
        assert_eq!(
            entries(&[0x10, 0x01, 0x00, 0x0c]),
            HashMap::from([(0x10, vec![0x00])])
        );
    }

    #[test]
    fn test_duplicate_tag_last_wins() {
        assert_eq!(
            entries(&[0x10, 0x01, 0x01, 0x10, 0x02, 0x02, 0x03]),
            HashMap::from([(0x10, vec![0x02, 0x03])])
        );
    }

    #[test]
    fn test_tag_labels() {
        assert_eq!(tag_label(NEARBY_TAG), "nearby");
        assert_eq!(tag_label(0x0c), "handoff");
        assert_eq!(tag_label(0x42), "0x42");
        assert_eq!(AdvertisementType::from_tag(0x0b), Some(AdvertisementType::WatchConnection));
        assert_eq!(AdvertisementType::from_tag(0x01), None);
    }
}
