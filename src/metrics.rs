//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存防护层的指标收集功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集缓存命中、锁竞争和下单结果等运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 缓存请求统计
    /// key: "namespace:op:result"
    pub cache_requests: Arc<Mutex<HashMap<String, u64>>>,
    /// 分布式锁统计
    /// key: "op:result"
    pub lock_events: Arc<Mutex<HashMap<String, u64>>>,
    /// 下单结果统计
    /// key: "granted" 或拒绝原因
    pub placements: Arc<Mutex<HashMap<String, u64>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// 记录缓存请求
    ///
    /// # 参数
    ///
    /// * `namespace` - 键前缀
    /// * `op` - 读取策略（pass_through/mutex/logical）
    /// * `result` - 结果（hit/null_hit/miss/rebuild/stale）
    pub fn record_cache(&self, namespace: &str, op: &str, result: &str) {
        let span = span!(Level::TRACE, "cache_request", namespace, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", namespace.trim_end_matches(':'), op, result);
        *locked(&self.cache_requests).entry(key).or_insert(0) += 1;
    }

    /// 记录锁事件（acquire/release 以及 ok/contended/lost）
    pub fn record_lock(&self, op: &str, result: &str) {
        let key = format!("{}:{}", op, result);
        *locked(&self.lock_events).entry(key).or_insert(0) += 1;
    }

    /// 记录下单结果
    pub fn record_placement(&self, outcome: &str) {
        *locked(&self.placements)
            .entry(outcome.to_string())
            .or_insert(0) += 1;
    }

    /// 读取单个缓存计数
    pub fn cache_count(&self, namespace: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", namespace.trim_end_matches(':'), op, result);
        locked(&self.cache_requests).get(&key).copied().unwrap_or(0)
    }

    /// 读取单个下单结果计数
    pub fn placement_count(&self, outcome: &str) -> u64 {
        locked(&self.placements).get(outcome).copied().unwrap_or(0)
    }

    /// 清空所有计数
    pub fn reset(&self) {
        locked(&self.cache_requests).clear();
        locked(&self.lock_events).clear();
        locked(&self.placements).clear();
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为 Prometheus 文本格式
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    for (k, v) in locked(&metrics.cache_requests).iter() {
        let parts: Vec<&str> = k.rsplitn(3, ':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "cache_requests_total{{namespace=\"{}\", op=\"{}\", result=\"{}\"}} {}\n",
                parts[2], parts[1], parts[0], v
            ));
        }
    }
    for (k, v) in locked(&metrics.lock_events).iter() {
        if let Some((op, result)) = k.split_once(':') {
            output.push_str(&format!(
                "lock_events_total{{op=\"{}\", result=\"{}\"}} {}\n",
                op, result, v
            ));
        }
    }
    for (k, v) in locked(&metrics.placements).iter() {
        output.push_str(&format!(
            "order_placements_total{{outcome=\"{}\"}} {}\n",
            k, v
        ));
    }
    output
}
