use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, bail};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::common::traits::ScheduleEvaluator;

// ==========================================
// 1. 时间工具 (TimeUtils)
// ==========================================

/// 时间工具
///
/// 内部统一使用 f64 的 Unix 秒时间戳，这里负责和 chrono 的 DateTime 互转。
pub struct TimeUtils;

impl TimeUtils {
    /// 当前 Unix 时间戳 (秒，带小数)
    pub fn now_f64() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// f64 时间戳 -> UTC DateTime
    pub fn to_datetime_utc(ts: f64) -> Option<DateTime<Utc>> {
        let secs = ts.trunc() as i64;
        let nanos = (ts.fract() * 1_000_000_000.0) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    /// DateTime -> f64 时间戳
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> f64 {
        dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
    }
}

// ==========================================
// 2. Cron 求值器 (CronEvaluator)
// ==========================================

/// 默认调度描述符求值器
///
/// 支持两种语法:
/// - `@every <n><s|m|h>`: 固定间隔，例如 `@every 30s`, `@every 5m`。
/// - Cron 表达式 (6/7 字段，秒在前)，可配合 IANA 时区字符串求值。
#[derive(Debug, Clone, Default)]
pub struct CronEvaluator;

impl CronEvaluator {
    /// 解析 `@every <n><s|m|h>` 为秒数
    fn parse_every(descriptor: &str) -> anyhow::Result<f64> {
        let spec = descriptor
            .trim_start_matches("@every")
            .trim();
        let Some(last) = spec.chars().last() else {
            bail!("empty @every interval");
        };
        let (num, unit) = spec.split_at(spec.len() - last.len_utf8());
        let value: f64 = num
            .trim()
            .parse()
            .with_context(|| format!("invalid @every interval: {spec}"))?;
        if value <= 0.0 {
            bail!("@every interval must be positive: {spec}");
        }
        let secs = match unit {
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => bail!("unknown @every unit (expected s/m/h): {spec}"),
        };
        Ok(secs)
    }

    /// 在指定时区内求 Cron 表达式的下一次触发
    fn next_cron(descriptor: &str, timezone: Option<&str>, after: f64) -> anyhow::Result<f64> {
        let schedule = cron::Schedule::from_str(descriptor)
            .with_context(|| format!("invalid cron expression: {descriptor}"))?;

        let anchor = TimeUtils::to_datetime_utc(after)
            .with_context(|| format!("timestamp out of range: {after}"))?;

        // after() 已经是严格大于语义，find 再兜底一次防止浮点截断
        let next = match timezone {
            Some(tz_name) => {
                let tz: Tz = tz_name
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid timezone {tz_name}: {e}"))?;
                schedule
                    .after(&anchor.with_timezone(&tz))
                    .map(|dt| TimeUtils::from_datetime(&dt))
                    .find(|ts| *ts > after)
            }
            None => schedule
                .after(&anchor)
                .map(|dt| TimeUtils::from_datetime(&dt))
                .find(|ts| *ts > after),
        };

        next.with_context(|| format!("cron expression will never fire again: {descriptor}"))
    }
}

impl ScheduleEvaluator for CronEvaluator {
    fn next_after(
        &self,
        descriptor: &str,
        timezone: Option<&str>,
        after: f64,
    ) -> anyhow::Result<f64> {
        let descriptor = descriptor.trim();
        if descriptor.is_empty() {
            bail!("empty schedule descriptor");
        }
        if descriptor.starts_with("@every") {
            let interval = Self::parse_every(descriptor)?;
            return Ok(after + interval);
        }
        Self::next_cron(descriptor, timezone, after)
    }
}
