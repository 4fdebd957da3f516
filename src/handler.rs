use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, ConfigOverrides};
use crate::processor::Collaborators;
use crate::scheduler::{notify_webhook, BatchReport, BatchScheduler};

/// HTTP 服务共享状态
#[derive(Debug, Clone, Default)]
pub struct AppState {
    /// 启动时指定的配置文件
    pub config_file: Option<PathBuf>,
}

/// 提取请求：视频地址列表，其余字段覆盖配置
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub urls: Vec<String>,
    #[serde(flatten)]
    pub overrides: ConfigOverrides,
}

/// 健康检查 Handler
pub async fn health_check() -> &'static str {
    "OK"
}

/// 批量提取幻灯片，全部任务结束后返回报告
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> Result<ResponseJson<BatchReport>, (StatusCode, String)> {
    info!("收到提取请求: {} 个视频", request.urls.len());

    let urls: Vec<String> = request
        .urls
        .iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "视频地址列表为空".to_string()));
    }

    // 构建配置：优先级为 请求参数 > 环境变量 > 配置文件 > 默认值
    let config = ConfigLoader::load(state.config_file.as_deref(), request.overrides)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let config = Arc::new(config);

    let scheduler = BatchScheduler::new(Collaborators::from_config(&config));
    let jobs = BatchScheduler::plan(&urls, Arc::clone(&config));
    let report = scheduler
        .run(jobs, config.max_concurrency)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    if let Err(e) = report.write_to(&config.output_dir) {
        warn!("⚠️  保存批处理报告失败: {:#}", e);
    }

    if let Some(webhook_url) = &config.webhook_url {
        if let Err(e) = notify_webhook(webhook_url, &report).await {
            error!("Webhook 回调失败: {:#}", e);
        }
    }

    info!("处理完成: {}", report.summary_lines().join("\n"));
    Ok(ResponseJson(report))
}
