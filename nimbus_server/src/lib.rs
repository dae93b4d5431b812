//! NimbusVPN issuance server.
//!
//! Verifies credentials, allocates unique virtual addresses, generates
//! tunnel key pairs, and renders the configuration documents the external
//! WireGuard tooling consumes. The HTTP facade in [`api`] is a thin mapping
//! onto [`auth::AuthGateway`] and [`issuer::ConfigIssuer`].

pub mod allocator;
pub mod api;
pub mod auth;
pub mod issuer;
pub mod store;
