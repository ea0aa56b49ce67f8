//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod demo;
pub mod dump;
pub mod render;

// Re-export main command functions
pub use demo::{execute_demo, DemoArgs};
pub use dump::{execute_dump, DumpArgs};
pub use render::{execute_render, RenderArgs};
