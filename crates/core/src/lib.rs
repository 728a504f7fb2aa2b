//! Shared building blocks for the conveyor job platform.
//!
//! This crate has no internal dependencies so every other crate (stores,
//! queue, worker, broker, auth) can use the same error taxonomy and
//! retry policy without pulling in heavyweight transports.

pub mod error;
pub mod retry;
pub mod types;

pub use error::CoreError;
