use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::JobContext;
use crate::common::model::JsonMap;

// ==========================================
// 1. 任务处理器 (JobHandler)
// ==========================================

/// 任务处理器
///
/// 一种 job_type 对应一个 Handler。返回 Ok 时的 JsonMap 会被写进任务的
/// results 字段；返回 Err / Panic / 超时都会让任务进入 Failed。
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonMap>;
}

/// 闭包 Handler 的适配器
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<JsonMap>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonMap> {
        (self.f)(ctx).await
    }
}

// ==========================================
// 2. 处理器注册表 (HandlerRegistry)
// ==========================================

/// 处理器注册表
///
/// 路由表用 Arc<HashMap> 做写时复制: 注册发生在启动阶段 (低频)，
/// 而每次分发只需要 clone 一个 Arc，读路径零锁。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: Arc<HashMap<String, Arc<dyn JobHandler>, ahash::RandomState>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同名覆盖
    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        // 独占时原地改，被共享时整表复制一份再改
        let mut routes = Arc::try_unwrap(std::mem::take(&mut self.routes))
            .unwrap_or_else(|shared| (*shared).clone());
        routes.insert(job_type.into(), handler);
        self.routes = Arc::new(routes);
    }

    /// 用闭包注册处理器
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JsonMap>> + Send + 'static,
    {
        self.register(job_type, Arc::new(FnHandler { f }));
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.routes.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.routes.contains_key(job_type)
    }

    /// 已注册的类型列表
    pub fn job_types(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }
}
