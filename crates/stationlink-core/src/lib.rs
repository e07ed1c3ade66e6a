/*!
 * StationLink Core
 *
 * This crate provides the ambient pieces shared by the StationLink crates:
 * configuration, logging, the typed event bus and the retry helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// StationLink core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
