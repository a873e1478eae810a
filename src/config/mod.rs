//! Configuration parsing and validation
//!
//! This module handles parsing of taskline.yml configuration files,
//! validation of their structure and building task trees out of them.

pub mod build;
pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use build::*;
pub use parse::*;
pub use schema::*;
pub use types::*;
