use serde::{Deserialize, Serialize};

use crate::common::model::JsonMap;
use crate::common::utils::new_job_id;

// ==========================================
// 1. 工作流定义 (WorkflowDefinition)
// ==========================================

/// 步骤类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    /// 执行一个注册的动作
    Action,
    /// 按条件表达式选择分支: next_steps[0] 为真分支, next_steps[1] 为假分支
    Condition,
    /// 条件成立期间反复执行动作，受步骤超时约束
    Loop,
    /// 并发走完 next_steps 里的每条链，全部返回后汇合
    Parallel,
}

/// 工作流步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 在定义内唯一的步骤 ID
    pub id: String,

    pub step_type: StepType,

    /// 动作名 (StepAction 注册表里的键)，Condition/Parallel 步骤可为空
    #[serde(default)]
    pub action: String,

    /// 动作参数
    #[serde(default)]
    pub params: JsonMap,

    /// 后继步骤
    #[serde(default)]
    pub next_steps: Vec<String>,

    /// 条件表达式
    /// - Action/Loop 步骤上是守卫: 为假时跳过 (记 Skipped)。
    /// - Condition 步骤上是分支判据。
    #[serde(default)]
    pub condition: Option<String>,

    /// 步骤超时 (毫秒)，Loop 步骤的迭代总时长也受它约束
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// 必需步骤失败会中止整个执行；非必需步骤失败只记录并继续
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl WorkflowStep {
    /// Action 步骤
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Action,
            action: action.into(),
            params: JsonMap::new(),
            next_steps: Vec::new(),
            condition: None,
            timeout_ms: None,
            required: true,
        }
    }

    /// Condition 分支步骤
    pub fn branch(id: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Condition,
            action: String::new(),
            params: JsonMap::new(),
            next_steps: Vec::new(),
            condition: Some(condition.into()),
            timeout_ms: None,
            required: true,
        }
    }

    /// Loop 步骤
    pub fn repeat(
        id: impl Into<String>,
        action: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Loop,
            action: action.into(),
            params: JsonMap::new(),
            next_steps: Vec::new(),
            condition: Some(condition.into()),
            timeout_ms: None,
            required: true,
        }
    }

    /// Parallel 汇合步骤
    pub fn parallel(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: StepType::Parallel,
            action: String::new(),
            params: JsonMap::new(),
            next_steps: Vec::new(),
            condition: None,
            timeout_ms: None,
            required: true,
        }
    }

    pub fn with_params(mut self, params: JsonMap) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next_steps.push(next.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// 标记为非必需: 失败只记录，不中止执行
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// 工作流定义
///
/// steps 有序，首个步骤即入口。执行时会对 steps 做快照，
/// 运行中的执行不受后续定义修改影响。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: u32,
    pub steps: Vec<WorkflowStep>,
    /// 声明的变量默认值
    #[serde(default)]
    pub variables: JsonMap,
    pub enabled: bool,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_job_id(),
            name: name.into(),
            version: 1,
            steps: Vec::new(),
            variables: JsonMap::new(),
            enabled: true,
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_variable(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    /// 入口步骤 (有序列表的第一个)
    pub fn entry_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }
}

// ==========================================
// 2. 工作流执行 (WorkflowExecution)
// ==========================================

/// 执行实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// 工作流执行实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub started_at: Option<f64>,
    #[serde(default)]
    pub completed_at: Option<f64>,
    /// 启动输入
    #[serde(default)]
    pub inputs: JsonMap,
    /// 最终输出 (完成时等于变量快照)
    #[serde(default)]
    pub outputs: JsonMap,
    /// 私有变量快照: 默认值被 inputs 覆盖后的合并结果，执行期间演化
    #[serde(default)]
    pub variables: JsonMap,
    /// 按完成顺序追加的步骤记录
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// 创建 Pending 实例，变量 = 声明默认值被 inputs 覆盖后的合并
    pub fn seed(workflow: &WorkflowDefinition, inputs: JsonMap) -> Self {
        let mut variables = workflow.variables.clone();
        for (k, v) in &inputs {
            variables.insert(k.clone(), v.clone());
        }
        Self {
            id: new_job_id(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            inputs,
            outputs: JsonMap::new(),
            variables,
            steps: Vec::new(),
            error: None,
        }
    }
}

/// 步骤记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// 单个步骤的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: String,
    /// 对应定义里的步骤 ID
    pub step_id: String,
    pub status: StepStatus,
    pub started_at: f64,
    #[serde(default)]
    pub completed_at: Option<f64>,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub outputs: JsonMap,
    /// Loop 步骤的迭代次数
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seed_merges_inputs_over_defaults() {
        let wf = WorkflowDefinition::new("wf")
            .with_variable("region", "us-east-1")
            .with_variable("retries", 3);
        let mut inputs = JsonMap::new();
        inputs.insert("region".into(), json!("eu-west-1"));

        let exec = WorkflowExecution::seed(&wf, inputs);
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(
            exec.variables.get("region").and_then(|v| v.as_str()),
            Some("eu-west-1")
        );
        assert_eq!(
            exec.variables.get("retries").and_then(|v| v.as_u64()),
            Some(3)
        );
    }

    #[test]
    fn entry_step_is_first_in_list() {
        let wf = WorkflowDefinition::new("wf")
            .with_step(WorkflowStep::action("a", "noop"))
            .with_step(WorkflowStep::action("b", "noop"));
        assert_eq!(wf.entry_step().map(|s| s.id.as_str()), Some("a"));
    }
}
