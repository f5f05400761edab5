//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `fanout` crate.
//!
//! It centralizes the error taxonomy and the logging bootstrap so every
//! component reports failures and events the same way.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};
