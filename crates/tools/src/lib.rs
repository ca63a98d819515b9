//! Built-in tools and the tool server for Cortex.
//!
//! Tools are registered explicitly in a [`ToolRegistry`] and served to the
//! dispatcher by a [`ToolServer`], either on stdio (a pipe backend) or on a
//! TCP port (a stream backend).

pub mod calculator;
pub mod server;
pub mod text;

use cortex_core::tool::ToolRegistry;

pub use server::ToolServer;

/// Create a registry with every built-in tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(calculator::CalculatorTool));
    registry.register(Box::new(text::AsciiValuesTool));
    registry.register(Box::new(text::ExponentialSumTool));
    registry
}
