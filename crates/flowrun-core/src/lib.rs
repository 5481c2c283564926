pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use traits::{AsyncFn, Callable, FnTool, Tool, ToolInvoker};
pub use types::*;
