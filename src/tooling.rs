//! Tooling & Integration Layer
//!
//! Command-line administration of a broker's durable state.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
