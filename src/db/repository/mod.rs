//! Repository layer: table-scoped database operations.
//!
//! Every function takes a borrowed `Connection` so callers decide the
//! transaction scope (the insert executor wraps batches in one).

mod business;
mod category;
mod geocode_cache;

pub use business::*;
pub use category::*;
pub use geocode_cache::*;
