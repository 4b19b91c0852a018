//! 执行层: 处理器路由与任务执行

pub mod context;
pub mod core;
pub mod handlers;
pub mod registry;

pub use context::JobContext;
pub use core::JobExecutor;
pub use handlers::register_builtin_handlers;
pub use registry::{HandlerRegistry, JobHandler};
