pub mod builtin;
pub mod registry;

pub use builtin::exit_loop::ExitLoopTool;
pub use registry::ToolRegistry;
