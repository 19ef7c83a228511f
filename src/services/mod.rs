//! Background services
//!
//! - `watcher` - Classifies files as they appear in the watch directory

pub mod watcher;

pub use watcher::*;
