//! # wavehub-core
//!
//! Core crate for WaveHub. Contains configuration schemas, typed
//! identifiers, state-map types, and the unified error system.
//!
//! This crate has **no** internal dependencies on other WaveHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
