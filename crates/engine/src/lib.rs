//! Talekeeper Engine library.
//!
//! Narrative progression for a solo RPG: gameplay events flow through the
//! event bus into the quest checker and the companion matcher, which record
//! progress and queue story beats for the AI narrator.
//!
//! ## Structure
//!
//! - `infrastructure/` - ports, storage adapters, clock, config, event bus
//! - `use_cases/` - quest progression, companion triggers, narrative queue
//! - `app` - Application composition

pub mod app;
pub mod infrastructure;
pub mod use_cases;


pub use app::App;
