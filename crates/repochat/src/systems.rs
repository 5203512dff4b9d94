mod mcp;
mod system;

pub use mcp::{McpSystem, SystemConfig};
pub use system::System;
