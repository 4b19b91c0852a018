use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 调度起搏器
///
/// 驱动调度循环的节奏: 固定周期兜底轮询，新任务可见时由 Notify 提前唤醒。
/// 调度循环是单 Actor，两次 Tick 永远不会重叠。
pub struct TickPacer {
    /// 暂停原子: 置位时只分发暂停，不影响已在执行的任务
    paused: Arc<AtomicBool>,
    /// 新任务可见性通知 (来自存储层)
    notify: Arc<Notify>,
    /// 关机信号
    shutdown: CancellationToken,
    /// 兜底轮询周期
    interval: Duration,
}

impl TickPacer {
    pub fn new(
        paused: Arc<AtomicBool>,
        notify: Arc<Notify>,
        shutdown: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            paused,
            notify,
            shutdown,
            interval,
        }
    }

    /// 等待下一次调度时机
    pub async fn wait_next(&self) -> PacerEvent {
        let deadline = Instant::now() + self.interval;
        loop {
            // 1. 检查 Shutdown (非阻塞)
            if self.shutdown.is_cancelled() {
                return PacerEvent::Shutdown;
            }
            // 2. 暂停时低频轮询，等恢复
            if self.paused.load(Ordering::Relaxed) {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return PacerEvent::Shutdown,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
                }
            }
            // 3. 软等待: 到点或被 Notify 提前唤醒
            tokio::select! {
                _ = self.shutdown.cancelled() => return PacerEvent::Shutdown,
                _ = self.notify.notified() => return PacerEvent::Tick,
                _ = tokio::time::sleep_until(deadline) => return PacerEvent::Tick,
            }
        }
    }
}

/// 起搏器产生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerEvent {
    /// 到了调度时机，去扫一轮
    Tick,
    /// 系统停机
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_wins_over_tick() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let pacer = TickPacer::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(Notify::new()),
            shutdown,
            Duration::from_secs(3600),
        );
        assert_eq!(pacer.wait_next().await, PacerEvent::Shutdown);
    }

    #[tokio::test]
    async fn notify_wakes_before_deadline() {
        let notify = Arc::new(Notify::new());
        let pacer = TickPacer::new(
            Arc::new(AtomicBool::new(false)),
            notify.clone(),
            CancellationToken::new(),
            Duration::from_secs(3600),
        );
        notify.notify_one();
        let event = tokio::time::timeout(Duration::from_secs(1), pacer.wait_next())
            .await
            .unwrap();
        assert_eq!(event, PacerEvent::Tick);
    }

    #[tokio::test]
    async fn paused_pacer_does_not_tick() {
        let paused = Arc::new(AtomicBool::new(true));
        let notify = Arc::new(Notify::new());
        let pacer = TickPacer::new(
            paused.clone(),
            notify.clone(),
            CancellationToken::new(),
            Duration::from_millis(10),
        );
        notify.notify_one();
        // 暂停期间不会产生 Tick
        let res = tokio::time::timeout(Duration::from_millis(300), pacer.wait_next()).await;
        assert!(res.is_err());
    }
}
