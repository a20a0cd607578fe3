//! Core utilities for the lumen graphics stack.
//!
//! This crate provides foundational types used across the workspace:
//! - The [`BackRef`] liveness-checked back-reference primitive
//! - Logging initialization

mod backref;
mod logging;

pub use backref::{BackRef, Expired};
pub use logging::init_logging;
