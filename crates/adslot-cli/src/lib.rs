//! Command-line components for the advertisement slot cache.

#![allow(missing_docs)]

pub mod commands;
pub mod logging;
pub mod summary;
