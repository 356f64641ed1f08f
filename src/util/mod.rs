//! Utility types shared across the facilitator.
//!
//! - [`b64`] - Base64 encoding/decoding wrapper used for SVM transaction payloads

pub mod b64;

pub use b64::*;
