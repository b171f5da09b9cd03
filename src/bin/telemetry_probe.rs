//! 遥测探针
//!
//! 通过完整的客户端管道发送一批不同级别和类别的示例错误，用于验证收集服务。

use anyhow::{Context, Result};
use clap::Parser;
use parachute_telemetry::common::{init_logging, AppConfig, Category, LogOptions, Severity};
use parachute_telemetry::logger::{spawn_monitored, ErrorBoundary, ErrorLoggingService};
use rand::Rng;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "telemetry_probe")]
#[command(about = "向错误收集服务发送示例错误")]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 覆盖上报端点，例如 http://127.0.0.1:8000/api/log/errors
    #[arg(short, long)]
    endpoint: Option<String>,

    /// 发送的示例数量
    #[arg(short = 'n', long, default_value = "20")]
    count: usize,

    /// 每条之间的间隔（毫秒）
    #[arg(long, default_value = "50")]
    interval_ms: u64,
}

const CATEGORIES: [Category; 6] = [
    Category::Network,
    Category::Api,
    Category::Validation,
    Category::Rendering,
    Category::Performance,
    Category::Dependency,
];

const SOURCES: [&str; 4] = ["upload", "viewer", "pipeline", "auth"];

fn sample_message(category: Category, rng: &mut impl Rng) -> String {
    match category {
        Category::Network => format!("Request timed out after {}ms", rng.gen_range(1000..30000)),
        Category::Api => format!("API responded with status {}", [400, 404, 500, 502][rng.gen_range(0..4)]),
        Category::Validation => "Video file exceeds maximum upload size".to_string(),
        Category::Rendering => format!("Failed to load mesh model_{}.glb", rng.gen_range(1..20)),
        Category::Performance => format!("Frame extraction took {}s", rng.gen_range(5..120)),
        Category::Dependency => "ffmpeg exited with code 1".to_string(),
        _ => "Unexpected failure".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(endpoint) = cli.endpoint {
        config.telemetry.log_endpoint = endpoint;
    }
    config.telemetry.log_to_server = true;

    let _guard = init_logging(&config.logging).context("初始化日志失败")?;
    info!(target: "probe", endpoint = %config.telemetry.log_endpoint, count = cli.count, "🔄 启动遥测探针");

    let service = ErrorLoggingService::init(config.telemetry.clone()).context("初始化日志服务失败")?;
    service.add_listener(|entry| {
        println!("👂 [{}] {} ({}x)", entry.severity.label(), entry.message, entry.occurrences);
    });

    let mut sent = 0usize;
    for _ in 0..cli.count {
        let (severity, category, source, message) = {
            let mut rng = rand::thread_rng();
            let severity = Severity::ALL[rng.gen_range(0..Severity::ALL.len())];
            let category = CATEGORIES[rng.gen_range(0..CATEGORIES.len())];
            let source = SOURCES[rng.gen_range(0..SOURCES.len())];
            (severity, category, source, sample_message(category, &mut rng))
        };
        let options = LogOptions::new()
            .source(source)
            .category(category)
            .context("probe", true);
        if service.log(severity, message, options) {
            sent += 1;
        }
        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }

    // 错误边界与受监控任务也走同一条管道
    let boundary = ErrorBoundary::new("ModelViewer", service.clone());
    let _ = boundary.run(|| Err::<(), _>("WebGL context lost"));
    let failed = spawn_monitored(async { Err::<(), _>("upload worker crashed") });
    let _ = failed.await;

    let outcome = service.shutdown().await;
    let stats = service.batch_stats();
    info!(
        target: "probe",
        sent,
        outcome = ?outcome,
        batches = stats.batches_sent,
        delivered = stats.entries_sent,
        failed_attempts = stats.failed_attempts,
        pending = service.pending_batch().len(),
        "✅ 探针完成"
    );
    Ok(())
}
