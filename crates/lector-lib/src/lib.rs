//! lector-lib — Document reader engine.
//!
//! Synthesis client, audio cache, playback engine, reader controller,
//! settings persistence, and HTTP API. Depends on lector-core for pure
//! types and text processing.

pub mod cache;
pub mod playback;
pub mod reader;
pub mod server;
pub mod settings;
pub mod synth;

#[cfg(test)]
mod testing;

// Re-export lector-core for convenience
pub use lector_core;
