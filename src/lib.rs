//! Raindrop Sync: mirrors a Raindrop.io collection tree into the native
//! bookmark tree and keeps it current.
//!
//! This library crate exposes all modules for use by the binary and integration tests.

pub mod app;
pub mod database;
pub mod managers;
pub mod platform;
pub mod rpc_handler;
pub mod services;
pub mod types;
