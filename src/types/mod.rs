// Raindrop Sync shared type definitions
// Each submodule defines types used across the crate.

pub mod bookmark;
pub mod collection;
pub mod errors;
pub mod raindrop;
pub mod settings;
pub mod status;
