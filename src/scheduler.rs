use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ExtractConfig;
use crate::error::ConfigError;
use crate::processor::{
    Collaborators, ExtractionJob, ExtractionResult, JobEvent, JobStage, JobStatus,
    ProgressCallback, VideoId,
};

/// 批处理报告，按任务完成顺序追加
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// 生成时间（RFC 3339）
    pub generated_at: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub results: Vec<ExtractionResult>,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            total: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ExtractionResult) {
        self.total += 1;
        match result.status {
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::Failed { .. } => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
        self.results.push(result);
    }

    pub fn get(&self, id: &VideoId) -> Option<&ExtractionResult> {
        self.results.iter().find(|r| &r.video_id == id)
    }

    /// 人类可读的汇总，每个失败任务附带错误类别
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "共 {} 个视频：成功 {}，失败 {}，取消 {}",
            self.total, self.succeeded, self.failed, self.cancelled
        )];
        for result in &self.results {
            let line = match &result.status {
                JobStatus::Succeeded => format!(
                    "  ✅ {}: {} 张幻灯片 -> {}",
                    result.video_id,
                    result.slides.len(),
                    result.output_dir.display()
                ),
                JobStatus::Failed { kind, message } => {
                    format!("  ❌ {}: [{}] {}", result.video_id, kind, message)
                }
                JobStatus::Cancelled => format!("  ⏹️  {}: 已取消", result.video_id),
            };
            lines.push(line);
        }
        lines
    }

    /// 写入 `dir/batch_report.json`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).context("创建输出目录失败")?;
        let path = dir.join("batch_report.json");
        let json = serde_json::to_string_pretty(self).context("序列化批处理报告失败")?;
        std::fs::write(&path, json).context(format!("写入批处理报告失败: {}", path.display()))?;
        Ok(path)
    }
}

/// 批处理调度器：最多 `max_concurrency` 个任务同时运行，其余按提交顺序排队
pub struct BatchScheduler {
    collaborators: Collaborators,
    progress: Option<ProgressCallback>,
}

impl BatchScheduler {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 为每个地址创建任务，同一批次内输出目录互不冲突
    ///
    /// 按小写比较：YouTube ID 区分大小写，而 macOS、Windows 的文件系统不区分。
    pub fn plan(locators: &[String], config: Arc<ExtractConfig>) -> Vec<ExtractionJob> {
        let mut used: HashSet<String> = HashSet::new();
        locators
            .iter()
            .map(|locator| {
                let job = ExtractionJob::new(locator.clone(), Arc::clone(&config));
                let mut id = job.id.clone();
                let mut suffix = 1;
                while used.contains(&id.as_str().to_lowercase()) {
                    suffix += 1;
                    id = job.id.with_suffix(suffix);
                }
                used.insert(id.as_str().to_lowercase());
                job.with_id(id)
            })
            .collect()
    }

    /// 运行所有任务直至全部结束
    ///
    /// 只有配置错误会返回 `Err`，且在任何任务启动之前；
    /// 单个任务的失败记录在报告中，不影响其他任务。
    pub async fn run(
        &self,
        jobs: Vec<ExtractionJob>,
        max_concurrency: usize,
    ) -> Result<BatchReport, ConfigError> {
        if max_concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(max_concurrency));
        }
        for job in &jobs {
            job.config.validate()?;
        }

        let started = Instant::now();
        let total = jobs.len();
        info!(
            "🚀 [批处理] 开始处理 {} 个视频，最大并发 {}",
            total, max_concurrency
        );
        for job in &jobs {
            if let Some(progress) = &self.progress {
                progress(&JobEvent {
                    video_id: job.id.clone(),
                    stage: JobStage::Queued,
                    message: job.locator.clone(),
                });
            }
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<ExtractionResult>();
        let collaborators = self.collaborators.clone();
        let progress = self.progress.clone();

        let dispatcher = tokio::spawn(async move {
            let mut tasks = JoinSet::new();

            for job in jobs {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        error!("❌ [批处理] 并发控制异常: {}", err);
                        break;
                    }
                };

                let tx = tx.clone();
                let collaborators = collaborators.clone();
                let progress = progress.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let (id, locator, output_dir) =
                        (job.id.clone(), job.locator.clone(), job.output_dir.clone());

                    let outcome = tokio::task::spawn_blocking(move || {
                        job.run(&collaborators, progress.as_ref())
                    })
                    .await;
                    let result = outcome.unwrap_or_else(|err| {
                        error!("❌ [批处理] 任务 {} 异常终止: {}", id, err);
                        ExtractionResult::internal_failure(
                            id,
                            locator,
                            output_dir,
                            format!("任务异常终止: {err}"),
                        )
                    });
                    let _ = tx.send(result);
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    if !err.is_cancelled() {
                        error!("❌ [批处理] 工作任务异常: {}", err);
                    }
                }
            }
        });

        let mut report = BatchReport::new();
        while let Some(result) = rx.recv().await {
            report.record(result);
            info!(
                "📊 [批处理] 进度 {}/{}（成功 {}，失败 {}，取消 {}）",
                report.total, total, report.succeeded, report.failed, report.cancelled
            );
        }
        if let Err(err) = dispatcher.await {
            error!("❌ [批处理] 调度任务异常: {}", err);
        }

        report.generated_at = chrono::Utc::now().to_rfc3339();
        info!(
            "🎉 [批处理] 全部完成，耗时 {:.2}秒",
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

/// Webhook 回调数据结构
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    /// 处理状态
    status: &'static str,
    /// 回调时间戳
    timestamp: String,
    report: &'a BatchReport,
}

/// 批处理完成后调用 webhook 回调
pub async fn notify_webhook(webhook_url: &str, report: &BatchReport) -> Result<()> {
    let payload = WebhookPayload {
        status: if report.failed == 0 { "success" } else { "partial_failure" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        report,
    };

    let client = reqwest::Client::new();
    let response = client
        .post(webhook_url)
        .json(&payload)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .context("Webhook 请求失败")?;

    let status = response.status();
    if status.is_success() {
        info!("✅ [回调] Webhook 回调成功: {}", webhook_url);
        Ok(())
    } else {
        let error_text = response.text().await.unwrap_or_default();
        warn!("⚠️  [回调] Webhook 返回错误状态: {} - {}", status, error_text);
        Err(anyhow::anyhow!("Webhook 返回错误状态: {}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{
        FakeFrameSource, FakeVideo, FakeVideoSource, RecordingRenderer, StateEngine,
    };
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    fn config(root: &Path) -> Arc<ExtractConfig> {
        Arc::new(ExtractConfig {
            output_dir: root.to_path_buf(),
            frame_interval_seconds: 5.0,
            similarity_threshold: 0.5,
            ..Default::default()
        })
    }

    fn collaborators(source: Arc<FakeVideoSource>, frames: Arc<FakeFrameSource>) -> Collaborators {
        Collaborators {
            source,
            frames,
            similarity: Arc::new(StateEngine),
            ocr: None,
            renderer: Arc::new(RecordingRenderer::default()),
        }
    }

    fn locators(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_block_siblings() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeVideoSource::failing(&["broken.mp4"]));
        let frames = Arc::new(
            FakeFrameSource::new(FakeVideo::states(5.0, &[10, 200, 10]))
                .with_video("outro.mp4", FakeVideo::states(5.0, &[10, 200, 10, 200, 10]))
                .with_open_delay(Duration::from_millis(20)),
        );
        let renderer = Arc::new(RecordingRenderer::default());
        let scheduler = BatchScheduler::new(Collaborators {
            renderer: renderer.clone(),
            ..collaborators(source, frames)
        });
        let jobs = BatchScheduler::plan(
            &locators(&["intro.mp4", "broken.mp4", "outro.mp4"]),
            config(root.path()),
        );

        let report = scheduler.run(jobs, 2).await.unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let broken = report.get(&VideoId::from_locator("broken.mp4")).unwrap();
        assert_eq!(broken.status.failure_kind(), Some(FailureKind::UnreadableVideo));
        assert!(report.get(&VideoId::from_locator("intro.mp4")).unwrap().is_success());
        assert!(report.get(&VideoId::from_locator("outro.mp4")).unwrap().is_success());
        assert!(root.path().join("video_intro").is_dir());
        assert!(!root.path().join("video_broken").exists());

        let outro = report.get(&VideoId::from_locator("outro.mp4")).unwrap();
        assert_eq!(outro.slides.len(), 5);
        assert_eq!(report.get(&VideoId::from_locator("intro.mp4")).unwrap().slides.len(), 3);

        let mut rendered = renderer.rendered.lock().unwrap().clone();
        rendered.sort();
        assert_eq!(rendered, vec!["intro", "outro"]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let root = tempfile::tempdir().unwrap();
        let frames = Arc::new(
            FakeFrameSource::new(FakeVideo::states(5.0, &[10, 200]))
                .with_open_delay(Duration::from_millis(50)),
        );
        let scheduler =
            BatchScheduler::new(collaborators(Arc::new(FakeVideoSource::default()), frames.clone()));
        let names: Vec<String> = (0..6).map(|i| format!("talk{i}.mp4")).collect();
        let jobs = BatchScheduler::plan(&names, config(root.path()));

        let report = scheduler.run(jobs, 2).await.unwrap();

        assert_eq!(report.succeeded, 6);
        assert_eq!(frames.probe.opened.load(Ordering::SeqCst), 6);
        assert!(frames.probe.max_active.load(Ordering::SeqCst) <= 2);
        assert_eq!(frames.probe.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_mode_starts_jobs_in_submission_order() {
        let root = tempfile::tempdir().unwrap();
        let frames = Arc::new(FakeFrameSource::new(FakeVideo::states(5.0, &[10])));
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        let scheduler = BatchScheduler::new(collaborators(
            Arc::new(FakeVideoSource::default()),
            frames,
        ))
        .with_progress(Arc::new(move |event: &JobEvent| {
            if event.stage == JobStage::Fetching {
                sink.lock().unwrap().push(event.video_id.to_string());
            }
        }));
        let jobs = BatchScheduler::plan(&locators(&["a.mp4", "b.mp4", "c.mp4"]), config(root.path()));

        let report = scheduler.run(jobs, 1).await.unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        let completed: Vec<_> = report.results.iter().map(|r| r.video_id.to_string()).collect();
        assert_eq!(completed, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_any_job_starts() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeVideoSource::default());
        let frames = Arc::new(FakeFrameSource::new(FakeVideo::constant(10.0, 1)));
        let scheduler = BatchScheduler::new(collaborators(source.clone(), frames));

        let bad = Arc::new(ExtractConfig {
            output_dir: root.path().to_path_buf(),
            frame_interval_seconds: -1.0,
            ..Default::default()
        });
        let jobs = BatchScheduler::plan(&locators(&["a.mp4"]), bad);
        assert!(matches!(
            scheduler.run(jobs, 2).await,
            Err(ConfigError::InvalidInterval(_))
        ));

        let jobs = BatchScheduler::plan(&locators(&["a.mp4"]), config(root.path()));
        assert!(matches!(
            scheduler.run(jobs, 0).await,
            Err(ConfigError::InvalidConcurrency(0))
        ));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plan_makes_output_dirs_unique() {
        let root = Path::new("/srv/slides");
        let jobs = BatchScheduler::plan(
            &locators(&[
                "https://youtu.be/abc",
                "https://www.youtube.com/watch?v=abc",
                "/videos/abc.mp4",
                "/videos/other.mp4",
            ]),
            config(root),
        );

        let dirs: Vec<_> = jobs.iter().map(|j| j.output_dir.clone()).collect();
        assert_eq!(
            dirs,
            vec![
                root.join("video_abc"),
                root.join("video_abc_2"),
                root.join("video_abc_3"),
                root.join("video_other"),
            ]
        );
    }

    #[test]
    fn test_plan_ignores_case_when_naming_output_dirs() {
        let root = Path::new("/srv/slides");
        let jobs = BatchScheduler::plan(
            &locators(&["https://youtu.be/AbCdEf", "https://youtu.be/aBcDeF"]),
            config(root),
        );

        assert_eq!(jobs[0].id.as_str(), "AbCdEf");
        assert_eq!(jobs[1].id.as_str(), "aBcDeF_2");
        let lowered: Vec<_> = jobs
            .iter()
            .map(|j| j.output_dir.to_string_lossy().to_lowercase())
            .collect();
        assert_ne!(lowered[0], lowered[1]);
    }

    #[test]
    fn test_report_counts_and_summary() {
        let mut report = BatchReport::new();
        let mut failed = ExtractionResult::new(VideoId::from_locator("b.mp4"), "b.mp4", "out");
        failed.status = JobStatus::Failed {
            kind: FailureKind::RenderError,
            message: "disk full".to_string(),
        };
        let mut cancelled = ExtractionResult::new(VideoId::from_locator("c.mp4"), "c.mp4", "out");
        cancelled.status = JobStatus::Cancelled;

        report.record(ExtractionResult::new(VideoId::from_locator("a.mp4"), "a.mp4", "out"));
        report.record(failed);
        report.record(cancelled);

        assert_eq!((report.succeeded, report.failed, report.cancelled), (1, 1, 1));
        let lines = report.summary_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("RenderError"));
        assert!(lines[3].contains("已取消"));
    }
}
