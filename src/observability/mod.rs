//! 日志初始化：默认级别可被 RUST_LOG 覆盖，日志写到 stderr，不干扰对话输出

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅者；重复调用（测试中）返回 false
pub fn init(default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok()
}
