//! CLI command implementations.

pub mod relay;
pub mod watch;
