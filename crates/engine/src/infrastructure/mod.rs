//! Infrastructure implementations.
//!
//! Contains port trait implementations, the event bus, and configuration.

pub mod clock;
pub mod config;
pub mod event_bus;
pub mod memory_store;
pub mod ports;
pub mod sqlite_store;
