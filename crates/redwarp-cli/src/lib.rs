#![warn(missing_docs)]

//! redwarp command-line front end: configuration loading and snapshot queries

pub mod cli;
pub mod config;

pub use cli::{build_service, execute, Cli, Command, WarpService};
pub use config::WarpConfig;
