// src/core/stats/event_key.rs

//! The string form of operator-log event keys: a base-36 encoding of the
//! 64-bit timestamp followed by a one-letter category.
//!
//! The digit alphabet is `0-9 a-k L m-z`: lowercase except for `L`, which
//! is uppercase so it cannot be confused with the digit `1` in log output.
//! Decoding accepts either case.

use crate::core::CitrineError;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijkLmnopqrstuvwxyz";

/// The event categories that appear in operator logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Status,
    Perf,
    Log,
}

impl EventCategory {
    pub fn letter(self) -> char {
        match self {
            EventCategory::Status => 'S',
            EventCategory::Perf => 'P',
            EventCategory::Log => 'L',
        }
    }

    pub fn from_letter(c: char) -> Result<Self, CitrineError> {
        match c.to_ascii_uppercase() {
            'S' => Ok(EventCategory::Status),
            'P' => Ok(EventCategory::Perf),
            'L' => Ok(EventCategory::Log),
            other => Err(CitrineError::InvalidRequest(format!(
                "unknown event category '{other}'"
            ))),
        }
    }
}

/// Encodes `timestamp` in canonical base-36 form and appends the category
/// letter.
pub fn encode_event_key(timestamp: u64, category: EventCategory) -> String {
    let mut digits = Vec::new();
    let mut remaining = timestamp;
    loop {
        digits.push(DIGITS[(remaining % 36) as usize]);
        remaining /= 36;
        if remaining == 0 {
            break;
        }
    }
    digits.reverse();
    let mut out = String::from_utf8(digits).expect("alphabet is ASCII");
    out.push(category.letter());
    out
}

/// Decodes an event key back into its timestamp and category. Letters are
/// matched case-insensitively; the canonical form is what `encode` emits.
pub fn decode_event_key(key: &str) -> Result<(u64, EventCategory), CitrineError> {
    let mut chars: Vec<char> = key.chars().collect();
    let category_letter = chars.pop().ok_or_else(|| {
        CitrineError::InvalidRequest("empty event key".to_string())
    })?;
    let category = EventCategory::from_letter(category_letter)?;
    if chars.is_empty() {
        return Err(CitrineError::InvalidRequest(
            "event key has no timestamp digits".to_string(),
        ));
    }

    let mut timestamp: u64 = 0;
    for c in chars {
        let digit = digit_value(c).ok_or_else(|| {
            CitrineError::InvalidRequest(format!("invalid base-36 digit '{c}'"))
        })?;
        timestamp = timestamp
            .checked_mul(36)
            .and_then(|t| t.checked_add(u64::from(digit)))
            .ok_or_else(|| {
                CitrineError::InvalidRequest("event key timestamp overflows 64 bits".to_string())
            })?;
    }
    Ok((timestamp, category))
}

fn digit_value(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'a'..='z' => Some(c as u8 - b'a' + 10),
        'A'..='Z' => Some(c as u8 - b'A' + 10),
        _ => None,
    }
}
