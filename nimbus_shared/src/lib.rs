//! Shared building blocks for NimbusVPN.
//!
//! This crate holds everything both the issuance server and the client
//! binary need: configuration loading, logging bootstrap, and the tunnel
//! profile document that the external WireGuard tooling consumes.

pub mod config;
pub mod logging;
pub mod profile;
