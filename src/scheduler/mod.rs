//! 调度层: 调度循环、构建器、提交客户端与统计

pub mod builder;
pub mod client;
pub mod core;
pub mod pacemaker;
pub mod stats;

pub use builder::SchedulerBuilder;
pub use client::SchedulerClient;
pub use core::Scheduler;
pub use pacemaker::{PacerEvent, TickPacer};
