//! Face-swap API server library.
//!
//! Exposes the core building blocks (config, state, error handling, routes,
//! job engine, WebSocket transport) so integration tests and the binary
//! entrypoint can both access them.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod inputs;
pub mod routes;
pub mod state;
pub mod ws;
