//! Wagerbook HTTP API
//!
//! Thin request layer over the ledger. Caller identity arrives in trusted
//! headers from the upstream identity provider and is not re-verified here.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{build_app, ApiServer};
