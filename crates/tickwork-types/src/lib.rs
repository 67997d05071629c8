//! Shared value model for the tickwork simulation engine.
//!
//! Everything a scripted process reads or writes on an entity is expressed
//! with the types in this crate, so the scheduler, the configuration loader
//! and external observers agree on one representation.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers (run identifiers)
//! - [`value`] -- [`Value`], the tagged union stored in entity state
//! - [`state`] -- [`State`], the ordered key/value map owned by an entity
//! - [`individual`] -- [`Individual`], a member of the population

pub mod ids;
pub mod individual;
pub mod state;
pub mod value;

pub use ids::RunId;
pub use individual::Individual;
pub use state::State;
pub use value::{Value, ValueKind};
