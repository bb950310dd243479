//! Foundation module - Core utilities and types
//!
//! - Math types and matrix helpers
//! - Logging bootstrap

pub mod logging;
pub mod math;
