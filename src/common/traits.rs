use std::sync::Arc;

use crate::common::model::AuditEvent;

// ==========================================
// 1. 调度描述符求值器 (ScheduleEvaluator)
// ==========================================

/// 调度描述符求值器
///
/// 把一个调度描述符字符串 (Cron 表达式 / 间隔语法) 求值为下一次触发时间。
/// 抽成 trait 是为了让循环任务的触发语法可替换，也方便测试注入固定时钟。
pub trait ScheduleEvaluator: Send + Sync + 'static {
    /// 计算 `after` 之后的下一次触发时间 (Unix 秒)
    ///
    /// 约定:
    /// - 返回值必须严格大于 `after`。
    /// - 描述符非法或永远不会再触发时返回 Err，
    ///   调度器据此把循环任务 fail-closed (禁用并记录错误)。
    fn next_after(&self, descriptor: &str, timezone: Option<&str>, after: f64)
    -> anyhow::Result<f64>;
}

impl<T: ScheduleEvaluator + ?Sized> ScheduleEvaluator for Arc<T> {
    fn next_after(
        &self,
        descriptor: &str,
        timezone: Option<&str>,
        after: f64,
    ) -> anyhow::Result<f64> {
        (**self).next_after(descriptor, timezone, after)
    }
}

// ==========================================
// 2. 审计出口 (AuditSink)
// ==========================================

/// 审计事件出口
///
/// Fire-and-forget 语义: record 不返回错误，审计失败绝不反向影响业务链路。
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: AuditEvent);
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, event: AuditEvent) {
        (**self).record(event)
    }
}
