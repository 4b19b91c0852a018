//! 审计出口实现
//!
//! 审计是 fire-and-forget 的: record 永不失败、永不阻塞业务链路。

use tracing::info;

use crate::common::model::AuditEvent;
use crate::common::traits::AuditSink;

/// 默认审计出口: 写结构化日志
///
/// 独立的 target 方便下游用 EnvFilter 把审计流单独路由。
#[derive(Debug, Clone, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            kind = %event.kind,
            entity_id = %event.entity_id,
            at = event.at,
            "{}",
            event.message
        );
    }
}

/// 丢弃一切的审计出口，测试用
#[derive(Debug, Clone, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
