//! 工具层：Schema Adapter、Argument Sanitizer、执行器、调用值类型与本地工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod invocation;
pub mod registry;
pub mod sanitizer;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{ReadFileTool, SafeFs};
pub use invocation::{Arguments, ToolInvocation, ToolResult};
pub use registry::{Tool, ToolRegistry};
pub use sanitizer::ArgumentSanitizer;
pub use schema::{chat_tools, strip_titles};
