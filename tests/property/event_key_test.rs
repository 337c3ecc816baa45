// tests/property/event_key_test.rs

//! Round-trip law for the base-36 event-key encoding: encoding is
//! canonical, decoding is its inverse and case-insensitive.

use citrinekv::core::stats::event_key::{EventCategory, decode_event_key, encode_event_key};
use proptest::prelude::*;

fn categories() -> impl Strategy<Value = EventCategory> {
    prop::sample::select(vec![
        EventCategory::Status,
        EventCategory::Perf,
        EventCategory::Log,
    ])
}

proptest! {
    #[test]
    fn encode_then_decode_is_identity(timestamp in any::<u64>(), category in categories()) {
        let key = encode_event_key(timestamp, category);
        let (decoded, decoded_category) = decode_event_key(&key).unwrap();
        prop_assert_eq!(decoded, timestamp);
        prop_assert_eq!(decoded_category, category);
    }

    #[test]
    fn decode_accepts_any_case(timestamp in any::<u64>(), category in categories()) {
        let key = encode_event_key(timestamp, category);
        let (upper, _) = decode_event_key(&key.to_uppercase()).unwrap();
        let (lower, _) = decode_event_key(&key.to_lowercase()).unwrap();
        prop_assert_eq!(upper, timestamp);
        prop_assert_eq!(lower, timestamp);
    }

    #[test]
    fn encoding_is_canonical(timestamp in any::<u64>(), category in categories()) {
        let key = encode_event_key(timestamp, category);
        // No leading zeroes except for the zero timestamp itself.
        if timestamp != 0 {
            prop_assert!(!key.starts_with('0'));
        }
        // The only uppercase timestamp digit is the 'L' that replaces 'l'.
        let digits = &key[..key.len() - 1];
        prop_assert!(digits.chars().all(|c| !c.is_ascii_uppercase() || c == 'L'));
    }
}
