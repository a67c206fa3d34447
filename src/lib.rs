pub mod config;
pub mod console;
pub mod core;
pub mod memory;
pub mod tools;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::ConsoleConfig;
pub use console::{ConsoleError, ConsoleHandle, ConsoleManager, ConsoleOptions, ConsoleResult};
pub use crate::core::*;
pub use memory::MemoryPersistence;
pub use tools::ToolRegistry;
