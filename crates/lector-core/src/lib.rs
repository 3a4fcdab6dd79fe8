//! lector-core — Pure types for the document reader.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod error;
pub mod segment;
pub mod settings;
pub mod types;
pub mod wav;
