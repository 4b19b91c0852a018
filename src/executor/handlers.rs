//! 内置任务处理器
//!
//! 常见运维类任务的开箱实现，全部对参数纯函数化:
//! 同样的参数永远产出同样的结果，不碰外部系统，方便做冒烟验证。

use serde_json::{Value, json};

use super::context::JobContext;
use super::registry::HandlerRegistry;
use crate::common::model::JsonMap;

fn str_param(ctx: &JobContext, key: &str, default: &str) -> String {
    ctx.param(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn u64_param(ctx: &JobContext, key: &str, default: u64) -> u64 {
    ctx.param(key).and_then(Value::as_u64).unwrap_or(default)
}

fn result_map(pairs: Vec<(&str, Value)>) -> JsonMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// 把全部内置处理器注册进注册表
pub fn register_builtin_handlers(registry: &mut HandlerRegistry) {
    registry.register_fn("health_check", |ctx: JobContext| async move {
        let target = str_param(&ctx, "target", "system");
        Ok(result_map(vec![
            ("target", json!(target)),
            ("status", json!("healthy")),
            ("checks_passed", json!(true)),
        ]))
    });

    registry.register_fn("backup", |ctx: JobContext| async move {
        let source = str_param(&ctx, "source", "/data");
        let destination = str_param(&ctx, "destination", "/backup");
        Ok(result_map(vec![
            ("source", json!(source)),
            ("destination", json!(destination)),
            ("status", json!("backed_up")),
        ]))
    });

    registry.register_fn("cleanup_logs", |ctx: JobContext| async move {
        let path = str_param(&ctx, "path", "/var/log");
        let older_than_days = u64_param(&ctx, "older_than_days", 30);
        // 有显式文件清单时按清单计数，否则认为没有可清理的文件
        let files_removed = ctx
            .param("files")
            .and_then(Value::as_array)
            .map(|files| files.len() as u64)
            .unwrap_or(0);
        Ok(result_map(vec![
            ("path", json!(path)),
            ("older_than_days", json!(older_than_days)),
            ("files_removed", json!(files_removed)),
        ]))
    });

    registry.register_fn("software_update", |ctx: JobContext| async move {
        let package = str_param(&ctx, "package", "all");
        let version = str_param(&ctx, "version", "latest");
        Ok(result_map(vec![
            ("package", json!(package)),
            ("version", json!(version)),
            ("status", json!("updated")),
        ]))
    });

    registry.register_fn("security_scan", |ctx: JobContext| async move {
        let scope = str_param(&ctx, "scope", "full");
        Ok(result_map(vec![
            ("scope", json!(scope)),
            ("vulnerabilities_found", json!(0)),
            ("status", json!("clean")),
        ]))
    });

    registry.register_fn("report_generation", |ctx: JobContext| async move {
        let report_type = str_param(&ctx, "report_type", "summary");
        let format = str_param(&ctx, "format", "json");
        Ok(result_map(vec![
            ("report_type", json!(report_type)),
            ("format", json!(format)),
            ("status", json!("generated")),
        ]))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::Job;
    use tokio_util::sync::CancellationToken;

    async fn run(registry: &HandlerRegistry, job: Job) -> JsonMap {
        let handler = registry.get(&job.job_type).unwrap();
        let ctx = JobContext::new(job, CancellationToken::new());
        handler.run(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn builtin_types_are_all_registered() {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);
        for job_type in [
            "health_check",
            "backup",
            "cleanup_logs",
            "software_update",
            "security_scan",
            "report_generation",
        ] {
            assert!(registry.contains(job_type), "missing handler: {job_type}");
        }
    }

    #[tokio::test]
    async fn cleanup_logs_reports_files_removed() {
        let mut registry = HandlerRegistry::new();
        register_builtin_handlers(&mut registry);

        let job = Job::new("cleanup_logs")
            .with_param("files", serde_json::json!(["a.log", "b.log", "c.log"]));
        let out = run(&registry, job).await;
        assert_eq!(out.get("files_removed").and_then(Value::as_u64), Some(3));

        let out = run(&registry, Job::new("cleanup_logs")).await;
        assert_eq!(out.get("files_removed").and_then(Value::as_u64), Some(0));
    }
}
