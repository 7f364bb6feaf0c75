//! CLI command implementations.

pub mod config;
pub mod note;
pub mod run;
pub mod studies;
