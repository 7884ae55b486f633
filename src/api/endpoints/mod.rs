//! API endpoint handlers.
//!
//! Handlers are thin: blocking work (SQLite, the geocoder and the REST sink)
//! runs inside `spawn_blocking` and goes through the seed pipeline.

pub mod businesses;
pub mod health;
pub mod seed;
