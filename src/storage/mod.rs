//! Storage layer
//!
//! Append-only column files and read-only memory maps over them.

pub mod file_manager;

pub use file_manager::{map_read_only, open_append, ColumnFiles};
