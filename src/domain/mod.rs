//! Domain layer for the trial monitor
//!
//! Studies, trials, notes and the store port the services are written against.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
