//! CLI command handlers.

pub mod run;
pub mod status;
