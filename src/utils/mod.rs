//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `popq` crate: the shared error type, logging
//! initialisation and the clock used for lease arithmetic.

pub mod clock;
pub mod error;
pub mod logging;
