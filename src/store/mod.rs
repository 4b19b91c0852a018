//! 存储层: 任务与循环任务的持久化抽象及内存实现

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{JobStore, RecurringJobStore};
