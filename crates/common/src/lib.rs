//! Common utilities and shared types for tubewatch.
//!
//! This crate provides the foundational pieces used by every tubewatch crate:
//!
//! - **Configuration**: Layered settings via [`Config`]
//! - **Error handling**: Unified error type via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use tubewatch_common::Config;
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     println!("Listening on port {}", config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
