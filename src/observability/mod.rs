//! 可观测性：tracing 订阅器初始化
//!
//! 日志写 stderr，stdout 只留给答案输出；RUST_LOG 可覆盖默认级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "info";

pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// 未设置 RUST_LOG 时使用 `default_directive`（如 "sage=debug"）；重复初始化静默忽略
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
