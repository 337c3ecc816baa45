// tests/property/mod.rs

//! Property-based tests for CitrineKV.

pub mod event_key_test;
pub mod wire_roundtrip_test;
