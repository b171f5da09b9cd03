//! 错误收集服务
//!
//! 接收客户端批量上报的错误，保存在内存中供查询，并写入按天滚动的审计文件。

use anyhow::{Context, Result};
use clap::Parser;
use parachute_telemetry::collector::start_server;
use parachute_telemetry::common::{init_logging, AppConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "telemetry_server")]
#[command(about = "Parachute 3D Pipeline 错误收集服务")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认读取 TELEMETRY_CONFIG 或 config/telemetry.toml）
    #[arg(short, long)]
    config: Option<String>,

    /// 覆盖监听地址
    #[arg(long)]
    host: Option<String>,

    /// 覆盖监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 覆盖内存中保留的条目数
    #[arg(long)]
    max_entries: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(max_entries) = cli.max_entries {
        config.server.max_entries = max_entries;
    }

    let _guard = init_logging(&config.logging).context("初始化日志失败")?;
    info!(
        target: "collector",
        host = %config.server.host,
        port = config.server.port,
        log_file = ?config.server.log_file,
        "🚀 启动错误收集服务"
    );

    if let Err(e) = start_server(&config.server).await {
        error!(target: "collector", error_type = e.get_error_type_summary(), "收集服务异常退出: {}", e);
        return Err(e.into());
    }
    Ok(())
}
