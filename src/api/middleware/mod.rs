//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter, per client
//! 2. Admin auth, on `/api/admin/*` only

pub mod auth;
pub mod rate;
