//! HTTP surface: the admin seed API and public read endpoints.
//!
//! Routes live under `/api/`. Admin routes (`/api/admin/*`) sit behind a
//! bearer token; every route is rate limited per client.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_api_server, start_api_server_on, ApiServer, ServerInfo};
pub use types::ApiContext;
