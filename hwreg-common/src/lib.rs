//! # hwreg Common Library
//!
//! Shared code for the hwreg device registration tools including:
//! - Error and result types
//! - Bootstrap configuration loading (TOML) and folder resolution
//! - Upload event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
