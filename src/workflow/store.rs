use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::common::TimeUtils;
use crate::common::error::{Result, SchedulerError};
use crate::common::model::JsonMap;

use super::model::{ExecutionStatus, StepExecution, WorkflowDefinition, WorkflowExecution};

// ==========================================
// 工作流存储 (WorkflowStore)
// ==========================================

struct StoreInner {
    definitions: DashMap<String, WorkflowDefinition>,
    executions: DashMap<String, WorkflowExecution>,
}

/// 工作流存储
///
/// 定义与执行实例都放 DashMap，更新在单条记录锁内完成。
/// 状态流转与任务存储同款 CAS 语义: 前置状态不匹配返回 false。
#[derive(Clone)]
pub struct WorkflowStore {
    inner: Arc<StoreInner>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                definitions: DashMap::new(),
                executions: DashMap::new(),
            }),
        }
    }

    // ==========================================
    // 1. 定义 CRUD
    // ==========================================

    pub fn insert_definition(&self, def: WorkflowDefinition) -> Result<()> {
        match self.inner.definitions.entry(def.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::Persistence(format!(
                "duplicate workflow id: {}",
                def.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(def);
                Ok(())
            }
        }
    }

    pub fn get_definition(&self, id: &str) -> Option<WorkflowDefinition> {
        self.inner.definitions.get(id).map(|d| d.clone())
    }

    pub fn list_definitions(&self) -> Vec<WorkflowDefinition> {
        self.inner.definitions.iter().map(|d| d.clone()).collect()
    }

    /// 整条替换，只在 ID 已存在时生效
    pub fn update_definition(&self, def: WorkflowDefinition) -> bool {
        match self.inner.definitions.get_mut(&def.id) {
            Some(mut slot) => {
                *slot = def;
                true
            }
            None => false,
        }
    }

    pub fn remove_definition(&self, id: &str) -> bool {
        self.inner.definitions.remove(id).is_some()
    }

    // ==========================================
    // 2. 执行实例
    // ==========================================

    pub fn insert_execution(&self, exec: WorkflowExecution) -> Result<()> {
        match self.inner.executions.entry(exec.id.clone()) {
            Entry::Occupied(_) => Err(SchedulerError::Persistence(format!(
                "duplicate execution id: {}",
                exec.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(exec);
                Ok(())
            }
        }
    }

    pub fn get_execution(&self, id: &str) -> Option<WorkflowExecution> {
        self.inner.executions.get(id).map(|e| e.clone())
    }

    pub fn execution_status(&self, id: &str) -> Option<ExecutionStatus> {
        self.inner.executions.get(id).map(|e| e.status)
    }

    pub fn executions_for(&self, workflow_id: &str) -> Vec<WorkflowExecution> {
        self.inner
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .map(|e| e.clone())
            .collect()
    }

    // ==========================================
    // 3. 执行状态流转 (CAS)
    // ==========================================

    /// Pending -> Running
    pub fn mark_execution_running(&self, id: &str) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if exec.status == ExecutionStatus::Pending {
                exec.status = ExecutionStatus::Running;
                exec.started_at = Some(TimeUtils::now_f64());
                return true;
            }
        }
        false
    }

    /// Running -> Completed，outputs = 变量终态
    pub fn complete_execution(&self, id: &str, outputs: JsonMap) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if exec.status == ExecutionStatus::Running {
                exec.status = ExecutionStatus::Completed;
                exec.completed_at = Some(TimeUtils::now_f64());
                exec.outputs = outputs;
                return true;
            }
        }
        false
    }

    /// Running|Paused -> Failed
    pub fn fail_execution(&self, id: &str, error: &str) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if matches!(
                exec.status,
                ExecutionStatus::Running | ExecutionStatus::Paused
            ) {
                exec.status = ExecutionStatus::Failed;
                exec.completed_at = Some(TimeUtils::now_f64());
                exec.error = Some(error.to_string());
                return true;
            }
        }
        false
    }

    /// Running -> Paused
    pub fn pause_execution(&self, id: &str) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if exec.status == ExecutionStatus::Running {
                exec.status = ExecutionStatus::Paused;
                return true;
            }
        }
        false
    }

    /// Paused -> Running
    pub fn resume_execution(&self, id: &str) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if exec.status == ExecutionStatus::Paused {
                exec.status = ExecutionStatus::Running;
                return true;
            }
        }
        false
    }

    /// Pending|Running|Paused -> Cancelled
    pub fn cancel_execution(&self, id: &str) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(id) {
            if !exec.status.is_terminal() {
                exec.status = ExecutionStatus::Cancelled;
                exec.completed_at = Some(TimeUtils::now_f64());
                return true;
            }
        }
        false
    }

    // ==========================================
    // 4. 执行期写入
    // ==========================================

    /// 追加一条步骤记录 (按完成顺序)
    pub fn append_step(&self, execution_id: &str, step: StepExecution) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(execution_id) {
            exec.steps.push(step);
            return true;
        }
        false
    }

    /// 整体替换变量快照
    pub fn set_variables(&self, execution_id: &str, variables: JsonMap) -> bool {
        if let Some(mut exec) = self.inner.executions.get_mut(execution_id) {
            exec.variables = variables;
            return true;
        }
        false
    }
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::WorkflowStep;

    #[test]
    fn execution_state_machine_is_cas() {
        let store = WorkflowStore::new();
        let wf = WorkflowDefinition::new("wf").with_step(WorkflowStep::action("a", "noop"));
        let exec = WorkflowExecution::seed(&wf, JsonMap::new());
        let id = exec.id.clone();
        store.insert_execution(exec).unwrap();

        // Pending 不能直接 Complete/Pause
        assert!(!store.complete_execution(&id, JsonMap::new()));
        assert!(!store.pause_execution(&id));

        assert!(store.mark_execution_running(&id));
        assert!(!store.mark_execution_running(&id));

        assert!(store.pause_execution(&id));
        assert!(store.resume_execution(&id));
        assert!(store.complete_execution(&id, JsonMap::new()));

        // 终态不可取消
        assert!(!store.cancel_execution(&id));
    }

    #[test]
    fn pending_execution_can_be_cancelled() {
        let store = WorkflowStore::new();
        let wf = WorkflowDefinition::new("wf");
        let exec = WorkflowExecution::seed(&wf, JsonMap::new());
        let id = exec.id.clone();
        store.insert_execution(exec).unwrap();

        assert!(store.cancel_execution(&id));
        assert!(!store.mark_execution_running(&id));
    }
}
