//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志输出和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

static INIT: Once = Once::new();

/// 初始化控制台日志
///
/// 可重复调用，只有第一次生效。`RUST_LOG` 存在时优先于 `default_filter`。
pub fn init_logging(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(filter)
            .try_init()
            .ok();
    });
}

/// 初始化 OpenTelemetry Tracing
///
/// 配置全局 tracer provider 并设置带 OpenTelemetry layer 的 subscriber。
/// 与 [`init_logging`] 互斥，由应用层二选一。
///
/// # 参数
///
/// * `service_name` - 服务名称
pub fn init_tracing(service_name: &str) {
    INIT.call_once(|| {
        // 未配置 exporter 时 provider 为 no-op
        let provider = SdkTracerProvider::builder().build();
        global::set_tracer_provider(provider.clone());

        let tracer = provider.tracer(service_name.to_string());
        let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

        let subscriber = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer())
            .with(telemetry);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
