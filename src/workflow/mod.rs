//! 工作流层: 定义、执行实例、条件求值与步骤遍历

pub mod condition;
pub mod engine;
pub mod model;
pub mod store;
mod walker;

pub use engine::{ActionRegistry, StepAction, WORKFLOW_JOB_TYPE, WorkflowEngine};
pub use model::{
    ExecutionStatus, StepExecution, StepStatus, StepType, WorkflowDefinition, WorkflowExecution,
    WorkflowStep,
};
pub use store::WorkflowStore;
