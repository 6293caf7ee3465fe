//! Common utility functions shared by the domain and the storage adapters.
//!
//! # Design Principles
//!
//! - **Pure functions only** - no I/O
//! - **Minimal dependencies** - chrono, serde_json and tracing only

pub mod datetime;
pub mod json_blob;

pub use datetime::parse_datetime;
pub use json_blob::Decoded;
