use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::ExtractConfig;
use crate::error::{ExtractError, FailureKind};
use crate::frame_source::{self, FrameSource, VideoInfo};
use crate::metadata::{format_timecode, DeckMetadata};
use crate::ocr::{OcrEngine, TesseractOcr};
use crate::renderer::{self, renderer_for, DocumentRenderer};
use crate::similarity::{PerceptualSimilarity, SimilarityEngine};
use crate::slide_detector::{SlideCandidate, SlideDetector};
use crate::video_processor::FfmpegFrameSource;
use crate::video_source::{DefaultVideoSource, VideoSource};

/// 视频标识，同时决定输出目录名
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    const MAX_LEN: usize = 64;

    /// 从地址推导标识：YouTube 取视频 ID，其余取路径最后一段（去掉扩展名）
    pub fn from_locator(locator: &str) -> Self {
        let locator = locator.trim();
        let raw = youtube_id(locator).unwrap_or_else(|| last_segment(locator));

        let sanitized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let sanitized: String = sanitized
            .trim_matches('_')
            .chars()
            .take(Self::MAX_LEN)
            .collect();

        if sanitized.is_empty() {
            VideoId("video".to_string())
        } else {
            VideoId(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 同一批次内重名时追加序号
    pub fn with_suffix(&self, n: usize) -> Self {
        VideoId(format!("{}_{}", self.0, n))
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn youtube_id(locator: &str) -> Option<String> {
    if let Some(pos) = locator.find("youtu.be/") {
        let rest = &locator[pos + "youtu.be/".len()..];
        return rest
            .split(['?', '#', '/'])
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    if locator.contains("youtube.com") {
        let query = locator.split_once('?')?.1;
        return query
            .split(['&', '#'])
            .find_map(|pair| pair.strip_prefix("v="))
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    None
}

fn last_segment(locator: &str) -> String {
    let path = locator.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    Path::new(segment)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 协作式取消标记，在采样步骤之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 任务所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Fetching,
    Sampling,
    Detecting,
    Recognizing,
    Rendering,
    Finished,
}

/// 进度事件
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub video_id: VideoId,
    pub stage: JobStage,
    pub message: String,
}

/// 进度回调，可能在多个工作线程上同时被调用
pub type ProgressCallback = Arc<dyn Fn(&JobEvent) + Send + Sync>;

/// 任务终态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

impl JobStatus {
    fn from_error(err: &ExtractError) -> Self {
        match err {
            ExtractError::Cancelled => JobStatus::Cancelled,
            ExtractError::UnreadableVideo(_) => JobStatus::Failed {
                kind: FailureKind::UnreadableVideo,
                message: err.to_string(),
            },
            ExtractError::Render(_) => JobStatus::Failed {
                kind: FailureKind::RenderError,
                message: err.to_string(),
            },
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            JobStatus::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// 单个视频的提取结果
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub video_id: VideoId,
    /// 原始地址
    pub source: String,
    /// 计划的输出目录；只有成功的任务会真正创建它
    pub output_dir: PathBuf,
    pub video: Option<VideoInfo>,
    pub frames_sampled: u64,
    pub frames_skipped: u64,
    /// 按序号排列的幻灯片；失败或取消时为空
    pub slides: Vec<SlideCandidate>,
    /// 渲染出的文档
    pub documents: Vec<PathBuf>,
    pub status: JobStatus,
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
}

fn serialize_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl ExtractionResult {
    pub fn new(video_id: VideoId, source: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_id,
            source: source.into(),
            output_dir: output_dir.into(),
            video: None,
            frames_sampled: 0,
            frames_skipped: 0,
            slides: Vec::new(),
            documents: Vec::new(),
            status: JobStatus::Succeeded,
            elapsed: Duration::ZERO,
        }
    }

    /// 任务线程异常终止时的结果
    pub fn internal_failure(
        video_id: VideoId,
        source: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(video_id, source, output_dir);
        result.status = JobStatus::Failed {
            kind: FailureKind::Internal,
            message: message.into(),
        };
        result
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// 一个提取任务用到的全部外部组件
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn VideoSource>,
    pub frames: Arc<dyn FrameSource>,
    pub similarity: Arc<dyn SimilarityEngine>,
    /// 未配置时跳过文字识别
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub renderer: Arc<dyn DocumentRenderer>,
}

impl Collaborators {
    /// 按配置组装默认实现：FFmpeg 解码、感知差异、tesseract、按格式选择渲染器
    pub fn from_config(config: &ExtractConfig) -> Self {
        let ocr: Option<Arc<dyn OcrEngine>> = if config.enable_ocr {
            Some(Arc::new(TesseractOcr::new(
                config.ocr_language.clone(),
                config.download_dir.join("ocr"),
            )))
        } else {
            None
        };

        Self {
            source: Arc::new(DefaultVideoSource::new(
                config.download_dir.clone(),
                config.keep_downloads,
            )),
            frames: Arc::new(FfmpegFrameSource::new()),
            similarity: Arc::new(PerceptualSimilarity::new()),
            ocr,
            renderer: renderer_for(config.export_format),
        }
    }
}

/// 单个视频的提取任务：拉取 → 采样与检测 → 文字识别（可选）→ 渲染
pub struct ExtractionJob {
    pub id: VideoId,
    pub locator: String,
    /// 最终输出目录
    pub output_dir: PathBuf,
    pub config: Arc<ExtractConfig>,
    pub cancel: CancelFlag,
}

impl ExtractionJob {
    pub fn new(locator: impl Into<String>, config: Arc<ExtractConfig>) -> Self {
        let locator = locator.into();
        let id = VideoId::from_locator(&locator);
        let output_dir = config.output_dir.join(format!("video_{id}"));
        Self {
            id,
            locator,
            output_dir,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_id(mut self, id: VideoId) -> Self {
        self.output_dir = self.config.output_dir.join(format!("video_{id}"));
        self.id = id;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 同步执行任务，始终返回结果；失败与取消以数据形式记录在结果中
    pub fn run(
        &self,
        collaborators: &Collaborators,
        progress: Option<&ProgressCallback>,
    ) -> ExtractionResult {
        let started = Instant::now();
        info!("🎬 [任务 {}] 开始处理: {}", self.id, self.locator);

        let mut result =
            ExtractionResult::new(self.id.clone(), self.locator.clone(), self.output_dir.clone());
        let outcome = self.extract(collaborators, progress, &mut result);
        result.elapsed = started.elapsed();

        let summary = match outcome {
            Ok(()) => {
                info!(
                    "🎉 [任务 {}] 完成：{} 张幻灯片，耗时 {:.2}秒",
                    self.id,
                    result.slides.len(),
                    result.elapsed.as_secs_f64()
                );
                format!("完成，{} 张幻灯片", result.slides.len())
            }
            Err(err) => {
                // 失败或取消的任务不保留任何幻灯片
                result.status = JobStatus::from_error(&err);
                result.slides.clear();
                result.documents.clear();
                match err {
                    ExtractError::Cancelled => warn!("⏹️  [任务 {}] 已取消", self.id),
                    _ => error!("❌ [任务 {}] 失败: {}", self.id, err),
                }
                err.to_string()
            }
        };

        self.emit(progress, JobStage::Finished, summary);
        result
    }

    fn extract(
        &self,
        collaborators: &Collaborators,
        progress: Option<&ProgressCallback>,
        result: &mut ExtractionResult,
    ) -> Result<(), ExtractError> {
        let config = &*self.config;
        self.check_cancelled()?;

        // 1. 拉取视频
        self.emit(
            progress,
            JobStage::Fetching,
            format!("拉取视频（{}）", config.resolution_tier),
        );
        let fetch_start = Instant::now();
        let video = collaborators
            .source
            .fetch(&self.locator, config.resolution_tier)?;
        info!(
            "✅ [拉取] {} 就绪，耗时: {:.2}秒",
            video.path().display(),
            fetch_start.elapsed().as_secs_f64()
        );

        // 2. 采样并检测幻灯片
        let detect_start = Instant::now();
        let mut handle = collaborators
            .frames
            .open(video.path(), config.resolution_tier)?;
        let info = handle.info();
        result.video = Some(info);
        self.emit(
            progress,
            JobStage::Sampling,
            format!(
                "时长 {}，每 {:.1}s 采样一帧",
                format_timecode(info.duration),
                config.frame_interval_seconds
            ),
        );

        let mut slides = Vec::new();
        {
            let mut sampler = frame_source::sample(
                &mut *handle,
                config.frame_interval_seconds,
                config.max_skip_ratio,
            )?;
            let mut detector =
                SlideDetector::new(collaborators.similarity.as_ref(), config.similarity_threshold);

            loop {
                self.check_cancelled()?;
                let Some(frame) = sampler.next() else { break };
                if let Some(slide) = detector.push(frame?) {
                    self.emit(
                        progress,
                        JobStage::Detecting,
                        format!("第 {} 张幻灯片 @ {}", slide.index, format_timecode(slide.timestamp)),
                    );
                    slides.push(slide);
                }
            }

            result.frames_sampled = sampler.produced();
            result.frames_skipped = sampler.skipped();
        }
        // 解码资源与下载文件在文字识别和渲染之前释放
        drop(handle);
        drop(video);
        info!(
            "✅ [检测] 采样 {} 帧（跳过 {}），检测到 {} 张幻灯片，耗时: {:.2}秒",
            result.frames_sampled,
            result.frames_skipped,
            slides.len(),
            detect_start.elapsed().as_secs_f64()
        );

        // 3. 文字识别
        if config.enable_ocr {
            match &collaborators.ocr {
                Some(ocr) => self.recognize(ocr.as_ref(), &mut slides, progress)?,
                None => warn!("⚠️  [识别] 未配置 OCR 引擎，跳过文字识别"),
            }
        }

        // 4. 渲染
        self.check_cancelled()?;
        self.emit(
            progress,
            JobStage::Rendering,
            format!("导出 {}（{} 张）", config.export_format, slides.len()),
        );
        let render_start = Instant::now();
        result.slides = slides;

        let snapshot = &*result;
        let documents = renderer::publish(&self.output_dir, |staging| {
            let documents = collaborators.renderer.render(snapshot, staging)?;
            DeckMetadata::from_result(snapshot, config, &documents).write_to(staging)?;
            Ok(documents)
        })?;
        info!(
            "✅ [渲染] 输出目录 {}，耗时: {:.2}秒",
            self.output_dir.display(),
            render_start.elapsed().as_secs_f64()
        );
        result.documents = documents;

        Ok(())
    }

    fn recognize(
        &self,
        ocr: &dyn OcrEngine,
        slides: &mut [SlideCandidate],
        progress: Option<&ProgressCallback>,
    ) -> Result<(), ExtractError> {
        self.emit(
            progress,
            JobStage::Recognizing,
            format!("识别 {} 张幻灯片的文字", slides.len()),
        );

        let mut failures = 0;
        for slide in slides.iter_mut() {
            self.check_cancelled()?;
            match ocr.recognize(&slide.image) {
                Ok(text) => {
                    let text = text.trim();
                    slide.text = (!text.is_empty()).then(|| text.to_string());
                }
                Err(e) => {
                    failures += 1;
                    warn!("⚠️  [识别] 第 {} 张幻灯片: {}", slide.index, e);
                }
            }
        }

        if failures > 0 {
            warn!("⚠️  [识别] {} 张幻灯片识别失败，已跳过", failures);
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, progress: Option<&ProgressCallback>, stage: JobStage, message: impl Into<String>) {
        if let Some(callback) = progress {
            callback(&JobEvent {
                video_id: self.id.clone(),
                stage,
                message: message.into(),
            });
        }
    }
}
