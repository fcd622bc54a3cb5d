//! armor-daemon library target.
//!
//! Exposes the router, state and orchestrator for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod orchestrator;
pub mod routes;
pub mod state;
