//! Subcommand implementations.

pub mod addr;
pub mod monitor;
pub mod route;
pub mod show;
