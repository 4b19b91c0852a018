use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::common::{TimeUtils, new_job_id};

/// JSON 对象的别名
///
/// 任务参数、执行结果、工作流变量统一使用这个类型在组件之间流转。
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ==========================================
// 1. 任务状态枚举 (JobStatus)
// ==========================================

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// 等待中
    /// - 任务已提交，等待调度循环发现它到期。
    Pending,

    /// 已调度
    /// - 任务已被调度循环选中并放入分发队列，等待 Worker 领取。
    Scheduled,

    /// 运行中
    /// - 任务已被 Worker 领取并开始执行。
    Running,

    /// 已暂停
    /// - 用户手动暂停，恢复后回到 Pending。
    Paused,

    /// 已完成 (终态)
    Completed,

    /// 已失败
    /// - 执行抛错、超时或 Panic。
    /// - 在 retry_count < max_retries 时可以通过显式 retry 回到 Pending。
    Failed,

    /// 已取消 (终态)
    /// - 只有 Pending / Scheduled 的任务可以被取消。
    Cancelled,
}

impl JobStatus {
    /// 状态是否是终态（不可流转）
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// 判断一次状态流转是否合法
    ///
    /// 状态机全貌：
    /// - Pending -> {Scheduled, Running, Cancelled, Paused}
    /// - Scheduled -> {Running, Cancelled, Pending(回退)}
    /// - Running -> {Completed, Failed}
    /// - Paused -> Pending
    /// - Failed -> Pending (仅显式 retry)
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Paused)
                | (Scheduled, Running)
                | (Scheduled, Cancelled)
                | (Scheduled, Pending)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Pending)
                | (Failed, Pending)
        )
    }
}

// ==========================================
// 2. 任务优先级 (JobPriority)
// ==========================================

/// 任务优先级
///
/// 派生 `Ord`，枚举顺序即大小顺序：Low < Normal < High < Critical。
/// 调度循环按优先级从高到低分发（Critical 永远先跑）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ==========================================
// 3. 核心任务数据 (Job)
// ==========================================

/// 任务数据
///
/// - 这是在 Store, Scheduler 和 Executor 之间流转的核心数据包。
/// - 更新必须是整条记录替换，或在单条记录锁内完成，外界看不到半成品状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // --- 基础标识 ---
    /// 全局唯一的任务 ID (NanoID)
    pub id: String,

    /// 任务类型，决定由哪个 Handler 执行
    pub job_type: String,

    /// 任务名称，用于日志和监控聚合
    pub name: String,

    /// 优先级
    #[serde(default)]
    pub priority: JobPriority,

    // --- 状态 ---
    /// 当前状态
    pub status: JobStatus,

    // --- 时间戳 (Unix Timestamp Secs) ---
    /// 创建时间
    pub created_at: f64,

    /// 计划执行时间
    /// - 创建时设定，之后只有显式 retry 会修改它。
    pub scheduled_at: f64,

    /// 开始执行时间
    #[serde(default)]
    pub started_at: Option<f64>,

    /// 结束时间 (完成/失败/取消)
    #[serde(default)]
    pub completed_at: Option<f64>,

    // --- 重试与超时 ---
    /// 已重试次数，不变式: retry_count <= max_retries
    #[serde(default)]
    pub retry_count: u32,

    /// 最大重试次数
    #[serde(default)]
    pub max_retries: u32,

    /// 执行超时 (毫秒)，None 时使用全局默认值，Some(0) 表示不设超时
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    // --- 载荷 ---
    /// 任务参数
    #[serde(default)]
    pub params: JsonMap,

    /// 执行结果，成功后由 Executor 写入
    #[serde(default)]
    pub results: JsonMap,

    /// 最后一次失败的错误信息
    #[serde(default)]
    pub error: Option<String>,

    // --- 归类与归属 ---
    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,

    /// 扩展元数据 (Workflow ID, Trace ID 等)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 创建者
    #[serde(default)]
    pub created_by: Option<String>,

    /// 指派给谁
    #[serde(default)]
    pub assigned_to: Option<String>,
}

impl Job {
    /// 创建一个新任务
    ///
    /// 默认: status=Pending, scheduled_at=now (立即到期), max_retries=3。
    pub fn new(job_type: impl Into<String>) -> Self {
        let now = TimeUtils::now_f64();
        let job_type = job_type.into();
        Self {
            id: new_job_id(),
            name: job_type.clone(),
            job_type,
            priority: JobPriority::Normal,
            status: JobStatus::Pending,
            created_at: now,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout_ms: None,
            params: JsonMap::new(),
            results: JsonMap::new(),
            error: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
            created_by: None,
            assigned_to: None,
        }
    }

    /// 设置名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// 设置任务参数
    pub fn with_params(mut self, params: JsonMap) -> Self {
        self.params = params;
        self
    }

    /// 设置单个参数
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// 设置最大重试次数
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置执行超时 (毫秒)
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// 设置计划执行时间 (Unix 秒)
    pub fn with_scheduled_at(mut self, at: f64) -> Self {
        self.scheduled_at = at;
        self
    }

    /// 添加标签
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// 添加元数据 (例如 TraceID)
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// 设置创建者
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    /// 检查是否还能重试
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// 执行耗时 (秒)，仅在开始和结束时间都存在时有值
    pub fn execution_secs(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) if c >= s => Some(c - s),
            _ => None,
        }
    }
}

// ==========================================
// 4. 循环任务 (RecurringJob)
// ==========================================

/// 循环任务的生成模板
///
/// 每次触发时按模板生成一个独立的新 Job。模板本身永远不被触发过程修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub job_type: String,
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub params: JsonMap,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobTemplate {
    pub fn new(job_type: impl Into<String>) -> Self {
        let job_type = job_type.into();
        Self {
            name: job_type.clone(),
            job_type,
            priority: JobPriority::Normal,
            params: JsonMap::new(),
            max_retries: 3,
            timeout_ms: None,
            tags: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: JsonMap) -> Self {
        self.params = params;
        self
    }

    /// 按模板实例化一个新 Job (全新 ID，独立生命周期)
    pub fn instantiate(&self, recurring_id: &str) -> Job {
        let mut job = Job::new(self.job_type.clone())
            .with_name(self.name.clone())
            .with_priority(self.priority)
            .with_params(self.params.clone())
            .with_max_retries(self.max_retries)
            .with_metadata("recurring_id", recurring_id);
        job.timeout_ms = self.timeout_ms;
        job.tags = self.tags.clone();
        job
    }
}

/// 循环任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    /// 全局唯一 ID
    pub id: String,

    /// 名称
    pub name: String,

    /// 调度描述符 (具体语法由 ScheduleEvaluator 决定)
    pub schedule: String,

    /// 时区字符串 (IANA，例如 "Asia/Shanghai")，None = UTC
    #[serde(default)]
    pub timezone: Option<String>,

    /// 是否启用
    /// - 调度描述符无法求值时会被自动置为 false (fail-closed)。
    pub enabled: bool,

    /// 上次触发时间
    #[serde(default)]
    pub last_run: Option<f64>,

    /// 下次触发时间
    /// - 不变式: 严格大于它被计算出来的那一刻。
    pub next_run: f64,

    /// 生成模板
    pub template: JobTemplate,

    /// 最后一次调度错误 (fail-closed 时的错误出口)
    #[serde(default)]
    pub last_error: Option<String>,

    pub created_at: f64,
}

impl RecurringJob {
    /// 创建循环任务，next_run 由调度器在提交时通过求值器补齐
    pub fn new(schedule: impl Into<String>, template: JobTemplate) -> Self {
        let now = TimeUtils::now_f64();
        Self {
            id: new_job_id(),
            name: template.name.clone(),
            schedule: schedule.into(),
            timezone: None,
            enabled: true,
            last_run: None,
            next_run: now,
            template,
            last_error: None,
            created_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }
}

// ==========================================
// 5. 统计指标 (JobStats)
// ==========================================

/// 任务统计汇总
///
/// 只读汇总，由统计聚合器基于 Store 全量计算。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    /// 任务总数
    pub total: usize,
    /// 按状态分桶
    pub by_status: HashMap<String, usize>,
    /// 按类型分桶
    pub by_type: HashMap<String, usize>,
    /// 成功率 (百分比 0..=100)
    /// - 定义: completed / (completed + failed) * 100
    /// - 分母为 0 时为 0，永远不会是 NaN。
    pub success_rate: f64,
    /// 平均执行耗时 (秒)
    /// - 只统计 Completed 任务，没有时为 0。
    pub average_execution_secs: f64,
}

// ==========================================
// 6. 审计事件 (AuditEvent)
// ==========================================

/// 审计事件
///
/// Fire-and-forget: 审计链路的失败绝不能影响它所记录的任务/工作流。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// 事件类型 (job_submitted, job_failed, workflow_completed ...)
    pub kind: String,
    /// 关联实体 ID (Job/RecurringJob/WorkflowExecution)
    pub entity_id: String,
    /// 事件描述
    pub message: String,
    /// 事件时间 (Unix 秒)
    pub at: f64,
}

impl AuditEvent {
    pub fn new(kind: &str, entity_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            entity_id: entity_id.to_string(),
            message: message.into(),
            at: TimeUtils::now_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_state_machine() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Scheduled));
        assert!(Pending.can_transition_to(Running));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(Paused.can_transition_to(Pending));

        // 非法流转
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn priority_orders_low_to_critical() {
        assert!(JobPriority::Low < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Critical);
    }

    #[test]
    fn template_instantiate_creates_independent_job() {
        let tpl = JobTemplate::new("backup").with_name("nightly-backup");
        let a = tpl.instantiate("rec-1");
        let b = tpl.instantiate("rec-1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.job_type, "backup");
        assert_eq!(
            a.metadata.get("recurring_id").map(String::as_str),
            Some("rec-1")
        );
        assert_eq!(a.status, JobStatus::Pending);
    }
}
