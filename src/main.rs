use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use slide_extract::{
    config::ConfigLoader, notify_webhook, BatchScheduler, CancelFlag, Collaborators,
    ConfigOverrides, ExportFormat, ExtractConfig, JobEvent, JobStage, ProgressCallback,
    ResolutionTier,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// 幻灯片提取工具 - 从讲座、演讲视频中提取幻灯片并导出为文档
#[derive(Parser, Debug)]
#[command(name = "slide-extract")]
#[command(about = "幻灯片提取工具：采样视频帧、检测幻灯片切换、导出 PDF/HTML/图片", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// 各子命令共用的配置参数
///
/// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
#[derive(ClapArgs, Debug, Default)]
struct SharedOptions {
    /// 配置文件路径（INI 格式）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 输出根目录
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 帧采样间隔（秒）
    #[arg(long)]
    interval: Option<f64>,

    /// 判定为新幻灯片的差异度阈值 (0.0-1.0)，值越大越严格
    #[arg(long)]
    threshold: Option<f64>,

    /// 分辨率档位：360p, 480p, 720p, 1080p, highest
    #[arg(long)]
    resolution: Option<ResolutionTier>,

    /// 导出格式：pdf, html, images
    #[arg(short, long)]
    format: Option<ExportFormat>,

    /// 对幻灯片做 OCR（需要安装 tesseract）
    #[arg(long)]
    ocr: bool,

    /// OCR 语言代码，例如 eng、chi_sim
    #[arg(long)]
    ocr_language: Option<String>,

    /// 批处理最大并发任务数
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// 允许跳过的不可读帧比例 (0.0-1.0)
    #[arg(long)]
    max_skip_ratio: Option<f64>,

    /// 保留下载的视频文件
    #[arg(long)]
    keep_downloads: bool,
}

impl SharedOptions {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            frame_interval_seconds: self.interval,
            similarity_threshold: self.threshold,
            resolution_tier: self.resolution,
            export_format: self.format,
            max_concurrency: self.max_concurrency,
            // 开关参数只在显式给出时覆盖
            enable_ocr: self.ocr.then_some(true),
            ocr_language: self.ocr_language.clone(),
            max_skip_ratio: self.max_skip_ratio,
            output_dir: self.output.clone(),
            keep_downloads: self.keep_downloads.then_some(true),
            ..Default::default()
        }
    }

    fn load(&self) -> Result<ExtractConfig> {
        ConfigLoader::load(self.config.as_deref(), self.overrides()).context("加载配置失败")
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 处理单个视频（本地路径、视频直链或网页地址）
    Extract {
        /// 视频地址
        locator: String,

        #[command(flatten)]
        options: SharedOptions,
    },
    /// 批量处理多个视频
    Batch {
        /// 视频地址列表
        locators: Vec<String>,

        /// 从文件读取视频地址（每行一个，# 开头为注释）
        #[arg(short, long)]
        input_file: Option<PathBuf>,

        #[command(flatten)]
        options: SharedOptions,
    },
    /// Web 服务模式：启动 HTTP 服务器接收提取请求
    Serve {
        /// 监听地址（默认从环境变量 FC_SERVER_PORT 读取，如果不存在则使用 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,

        /// 配置文件路径（INI 格式）
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "slide-extract.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Extract { locator, options } => {
            let config = options.load()?;
            init_logging(&config.log_level);
            run_batch(vec![locator], config).await?;
        }
        Commands::Batch {
            mut locators,
            input_file,
            options,
        } => {
            let config = options.load()?;
            init_logging(&config.log_level);
            if let Some(path) = input_file {
                locators.extend(read_locators(&path)?);
            }
            if locators.is_empty() {
                bail!("没有需要处理的视频地址");
            }
            run_batch(locators, config).await?;
        }
        Commands::Serve { bind, config } => {
            let loaded = ConfigLoader::load(config.as_deref(), ConfigOverrides::default())
                .context("加载配置失败")?;
            init_logging(&loaded.log_level);

            // 优先使用命令行参数，其次使用环境变量 FC_SERVER_PORT，最后使用默认值 9000
            let bind_addr = bind.unwrap_or_else(|| {
                std::env::var("FC_SERVER_PORT")
                    .map(|port| format!("0.0.0.0:{}", port))
                    .unwrap_or_else(|_| "0.0.0.0:9000".to_string())
            });
            start_web_server(&bind_addr, config).await?;
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                bail!("配置文件已存在: {}", path.display());
            }
            ConfigLoader::create_default_config(&path).context("生成配置文件失败")?;
            println!("已生成默认配置文件: {}", path.display());
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let level = tracing::Level::from_str(level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// 读取地址列表文件，忽略空行与注释
fn read_locators(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取地址列表失败: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn run_batch(locators: Vec<String>, config: ExtractConfig) -> Result<()> {
    info!(
        "使用配置: interval={:.1}s, threshold={:.2}, resolution={}, format={}, concurrency={}, ocr={}",
        config.frame_interval_seconds,
        config.similarity_threshold,
        config.resolution_tier,
        config.export_format,
        config.max_concurrency,
        config.enable_ocr
    );
    let config = Arc::new(config);

    // Ctrl-C 取消所有任务，已完成的结果保留
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 收到中断信号，正在取消剩余任务...");
                cancel.cancel();
            }
        });
    }

    let progress: ProgressCallback = Arc::new(|event: &JobEvent| match event.stage {
        JobStage::Finished => info!("🏁 [{}] {}", event.video_id, event.message),
        _ => info!("▶️  [{}] {:?}: {}", event.video_id, event.stage, event.message),
    });

    let jobs = BatchScheduler::plan(&locators, Arc::clone(&config))
        .into_iter()
        .map(|job| job.with_cancel(cancel.clone()))
        .collect();

    let scheduler = BatchScheduler::new(Collaborators::from_config(&config)).with_progress(progress);
    let report = scheduler
        .run(jobs, config.max_concurrency)
        .await
        .context("启动批处理失败")?;

    let report_path = report.write_to(&config.output_dir)?;
    for line in report.summary_lines() {
        println!("{}", line);
    }
    println!("报告已保存: {}", report_path.display());

    if let Some(webhook_url) = &config.webhook_url {
        if let Err(e) = notify_webhook(webhook_url, &report).await {
            warn!("⚠️  Webhook 回调失败: {:#}", e);
        }
    }

    if report.failed > 0 {
        bail!("{} 个视频处理失败", report.failed);
    }
    Ok(())
}

async fn start_web_server(bind: &str, config_file: Option<PathBuf>) -> Result<()> {
    use axum::{
        routing::{get, post},
        Router,
    };
    use slide_extract::handler::{self, AppState};
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    let state = AppState { config_file };

    let app = Router::new()
        .route("/", get(handler::health_check))
        .route("/health", get(handler::health_check))
        .route("/extract", post(handler::handle_extract))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    info!("Web 服务器启动在: http://{}", bind);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("可用端点:");
    info!("  • 健康检查: GET  http://{}/health", bind);
    info!("  • 幻灯片提取: POST http://{}/extract", bind);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}
