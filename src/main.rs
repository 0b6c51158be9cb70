use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use farm_core::{
    config::AppConfig,
    logging::init_logging,
    traits::{ChangeBroadcaster, Clock, SystemClock, TaskLogSink},
};
use farm_dispatcher::{SleepScheduler, StateMachine, TimeoutChecker};
use farm_infrastructure::{ChannelBroadcaster, DatabaseManager, TaskLogStorage};

mod shutdown;

use shutdown::ShutdownManager;

/// 渲染农场管理器
#[derive(Debug, Parser)]
#[command(name = "farm-manager", version, about = "渲染农场管理器：作业/任务编排核心")]
struct Cli {
    /// 配置文件路径，未指定时依次查找 config/farm-manager.toml 和 farm-manager.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    init_logging(&config.logging).context("初始化日志失败")?;

    info!("启动渲染农场管理器");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    let db = DatabaseManager::new(&config.database)
        .await
        .context("连接数据库失败")?;
    db.migrate().await.context("数据库迁移失败")?;
    db.health_check().await.context("数据库健康检查失败")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let broadcaster: Arc<dyn ChangeBroadcaster> = Arc::new(ChannelBroadcaster::default());
    let task_log: Arc<dyn TaskLogSink> = Arc::new(TaskLogStorage::new(
        &config.task_logs.root_dir,
        Arc::clone(&clock),
    ));

    let state_machine = Arc::new(StateMachine::new(
        db.job_repository(),
        db.task_repository(),
        Arc::clone(&broadcaster),
        Arc::clone(&task_log),
        config.orchestrator.clone(),
    ));

    // 上次运行中断时可能留下未推进的作业
    if let Err(e) = state_machine.check_stuck().await {
        error!("检查卡住的作业失败: {e}");
    }

    let timeout_checker = Arc::new(TimeoutChecker::new(
        db.task_repository(),
        db.worker_repository(),
        state_machine.clone(),
        Arc::clone(&broadcaster),
        Arc::clone(&task_log),
        Arc::clone(&clock),
        config.orchestrator.clone(),
    ));
    let sleep_scheduler = Arc::new(SleepScheduler::new(
        db.sleep_schedule_repository(),
        db.worker_repository(),
        Arc::clone(&broadcaster),
        Arc::clone(&clock),
        config.orchestrator.sleep_check_interval(),
    ));

    let shutdown_manager = ShutdownManager::new();

    let timeout_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let checker = Arc::clone(&timeout_checker);
        tokio::spawn(async move { checker.run(shutdown_rx).await })
    };
    let sleep_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let scheduler = Arc::clone(&sleep_scheduler);
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    info!("渲染农场管理器已启动");

    wait_for_shutdown_signal().await?;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    let loops = async {
        let (timeout_result, sleep_result) = tokio::join!(timeout_handle, sleep_handle);
        for result in [timeout_result, sleep_result] {
            if let Err(e) = result {
                error!("后台任务异常退出: {e}");
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(30), loops)
        .await
        .is_err()
    {
        warn!("后台任务关闭超时，强制退出");
    }

    db.close().await;
    info!("渲染农场管理器已退出");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
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
        signal::ctrl_c()
            .await
            .context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
