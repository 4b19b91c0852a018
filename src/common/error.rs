use thiserror::Error;

/// 调度器统一错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 调度器已关闭，拒绝新提交
    #[error("Scheduler is shutting down")]
    SchedulerShutdown,

    /// 内部通道已关闭
    #[error("Internal channel closed")]
    ChannelClosed,

    /// 序列化/反序列化失败
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 调度描述符非法 (Cron 表达式或 @every 语法)
    #[error("Invalid schedule descriptor: {0}")]
    InvalidSchedule(String),

    /// 存储层错误
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// 统一 Result 别名
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SchedulerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SchedulerError::ChannelClosed
    }
}
