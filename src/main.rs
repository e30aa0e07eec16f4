use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use experiment_scheduler::{Application, ShutdownManager};
use scheduler_core::{config::AppConfig, init_logging};
use tokio::signal;
use tracing::{error, info, warn};

/// 实验任务调度与Worker生命周期引擎
#[derive(Debug, Parser)]
#[command(name = "scheduler", version, about = "实验任务调度与Worker生命周期引擎")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，缺省时使用配置文件
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("默认路径")
        )
    })?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动实验调度引擎");
    info!(
        "存储后端: {:?}，计算资源: {} 个",
        config.database.backend,
        config.resources.len()
    );

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await?;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("实验调度引擎已退出");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => {
                info!("收到SIGTERM信号");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
