//! Solidus Common Library
//!
//! Shared error handling, logging and text helpers for the Solidus batch
//! tooling.
//!
//! # Overview
//!
//! - **Error Handling**: [`SolidusError`] and the [`Result`] alias
//! - **Logging**: [`logging::init_logging`] with console/file/JSON output
//! - **Text**: slug generation used by the category importer
//!
//! # Example
//!
//! ```no_run
//! use solidus_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod text;

// Re-export commonly used types
pub use error::{Result, SolidusError};
