//! CLI command handlers.

pub mod invoke;
pub mod sandbox;
pub mod trigger;
