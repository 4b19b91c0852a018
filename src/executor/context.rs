use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::common::error::Result;
use crate::common::model::{Job, JsonMap};

/// 任务执行上下文
///
/// Handler 能看到的全部世界: 任务快照 + 取消令牌。
/// 快照在进入 Running 时截取，执行期间外部的修改不会反映进来。
#[derive(Debug, Clone)]
pub struct JobContext {
    job: Job,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job: Job, cancel: CancellationToken) -> Self {
        Self { job, cancel }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> &str {
        &self.job.id
    }

    pub fn job_type(&self) -> &str {
        &self.job.job_type
    }

    /// 原始参数
    pub fn params(&self) -> &JsonMap {
        &self.job.params
    }

    /// 取单个参数
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.job.params.get(key)
    }

    /// 把参数整体反序列化为强类型
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::Value::Object(self.job.params.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// 取消令牌，长任务应在循环中检查它
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
