//! Durable state: atomic snapshot persistence and exclusive ownership.

pub mod fsync;
pub mod state;

pub use state::{
    EngineState, SCHEMA_VERSION, StateError, StateLock, StateStore, read_snapshot, reset,
};
