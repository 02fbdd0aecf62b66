use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// 初始化日志：`RUST_LOG` 优先，否则默认 `info`，`-v` 时为 `debug`
///
/// 日志写到 stderr，stdout 只留给命令的输出。
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "shotpipe=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("初始化日志失败: {}", e))
}
