//! Subcommand implementations.

pub mod config;
pub mod detect;
pub mod inspect;
pub mod models;
