use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 安装全局日志订阅者
///
/// `RUST_LOG` 存在时覆盖 `log_level`。`log_format` 取 `json` 或 `pretty`，
/// 重复安装返回错误。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("无效的日志级别: {log_level}"))?;

    let subscriber = tracing_subscriber::registry().with(filter);
    let installed = match log_format {
        "json" => subscriber
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        "pretty" => subscriber.with(fmt::layer().pretty().with_target(true)).try_init(),
        other => return Err(anyhow!("不支持的日志格式: {other}")),
    };

    installed.context("日志系统已初始化或初始化失败")
}
