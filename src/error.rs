use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// 单个提取任务的终止性错误
#[derive(Debug, Error)]
pub enum ExtractError {
    /// 视频拉取失败、无法解码，或跳帧比例超过容忍度
    #[error("视频不可读: {0}")]
    UnreadableVideo(String),

    /// 幻灯片已计算完成，但输出阶段失败
    #[error(transparent)]
    Render(#[from] RenderError),

    /// 收到取消请求（不属于失败）
    #[error("任务已取消")]
    Cancelled,
}

impl ExtractError {
    pub fn unreadable(message: impl Into<String>) -> Self {
        ExtractError::UnreadableVideo(message.into())
    }
}

impl From<SourceError> for ExtractError {
    fn from(err: SourceError) -> Self {
        ExtractError::UnreadableVideo(err.to_string())
    }
}

/// 视频源拉取错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("视频不可用: {0}")]
    Unavailable(String),

    #[error("不支持的视频源: {0}")]
    Unsupported(String),
}

/// OCR 识别失败，只影响单张幻灯片
#[derive(Debug, Error)]
#[error("文字识别失败: {0}")]
pub struct RecognitionError(pub String);

/// 文档渲染错误
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("写入输出失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("图像编码失败: {0}")]
    Image(#[from] image::ImageError),

    #[error("生成 PDF 失败: {0}")]
    Pdf(String),

    #[error("没有可渲染的幻灯片")]
    NoSlides,
}

impl From<lopdf::Error> for RenderError {
    fn from(err: lopdf::Error) -> Self {
        RenderError::Pdf(err.to_string())
    }
}

/// 单帧读取失败（可跳过）
#[derive(Debug, Error)]
#[error("读取 {timestamp:.2}s 处的帧失败: {reason}")]
pub struct FrameReadError {
    pub timestamp: f64,
    pub reason: String,
}

impl FrameReadError {
    pub fn new(timestamp: f64, reason: impl Into<String>) -> Self {
        Self {
            timestamp,
            reason: reason.into(),
        }
    }
}

/// 配置取值非法，在任何任务启动之前报告
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("帧采样间隔必须大于 0，当前值: {0}")]
    InvalidInterval(f64),

    #[error("相似度阈值必须在 0.0-1.0 之间，当前值: {0}")]
    InvalidThreshold(f64),

    #[error("最大并发数必须至少为 1，当前值: {0}")]
    InvalidConcurrency(usize),

    #[error("跳帧容忍比例必须在 0.0-1.0 之间，当前值: {0}")]
    InvalidSkipRatio(f64),

    #[error("未知的分辨率档位: {0}（可选: 360p, 480p, 720p, 1080p, highest）")]
    UnknownResolution(String),

    #[error("未知的导出格式: {0}（可选: pdf, html, images）")]
    UnknownFormat(String),

    #[error("配置文件 {path} 中 {key} 的取值无法解析: {value}")]
    Malformed {
        path: PathBuf,
        key: String,
        value: String,
    },

    #[error("读取配置文件失败: {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// 报告中记录的失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    UnreadableVideo,
    RenderError,
    /// 任务线程异常终止
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::UnreadableVideo => write!(f, "UnreadableVideo"),
            FailureKind::RenderError => write!(f, "RenderError"),
            FailureKind::Internal => write!(f, "Internal"),
        }
    }
}
