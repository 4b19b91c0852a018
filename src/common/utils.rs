use nanoid::nanoid;
use rand::Rng;

/// 生成全局唯一任务 ID
///
/// 使用 NanoID 默认 21 位字母表，碰撞概率可以忽略不计。
pub fn new_job_id() -> String {
    nanoid!()
}

/// 计算重试退避时间 (秒)
///
/// 指数退避 + 全抖动 (Full Jitter):
/// - 基础值按 2^(attempt-1) 翻倍，封顶 max_secs。
/// - 在 [0, backoff] 内随机取值，打散重试风暴。
/// - 下限 0.1 秒，避免退化成忙等。
pub fn calculate_backoff(attempt: u32, base_secs: f64, max_secs: f64) -> f64 {
    let exp = attempt.saturating_sub(1).min(16);
    let backoff = (base_secs * 2f64.powi(exp as i32)).min(max_secs);
    let jittered = rand::rng().random_range(0.0..=backoff);
    jittered.max(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(new_job_id()));
        }
    }

    #[test]
    fn backoff_is_capped_and_positive() {
        for attempt in 1..=20 {
            let delay = calculate_backoff(attempt, 30.0, 3600.0);
            assert!(delay >= 0.1);
            assert!(delay <= 3600.0);
        }
    }
}
