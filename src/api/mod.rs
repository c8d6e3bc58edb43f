//! HTTP API of the game server.
//!
//! - [`client`] - async client for auth and room listing
//! - [`types`] - request/response data types and [`ApiError`]

pub mod client;
pub mod types;

pub use client::ApiClient;
pub use types::{ApiError, PublicGame};
