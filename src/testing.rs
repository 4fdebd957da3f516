//! 测试用的脚本化协作组件

use image::{Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ResolutionTier;
use crate::error::{ExtractError, FrameReadError, RecognitionError, RenderError, SourceError};
use crate::frame_source::{FrameSource, VideoHandle, VideoInfo};
use crate::ocr::OcrEngine;
use crate::processor::{CancelFlag, ExtractionResult};
use crate::renderer::DocumentRenderer;
use crate::similarity::SimilarityEngine;
use crate::video_source::{FetchedVideo, VideoSource};

/// 纯色帧，亮度即“画面状态”
pub fn solid_frame(level: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([level, level, level]))
}

/// 按时间均分的帧序列，`None` 表示该段无法解码
#[derive(Debug, Clone)]
pub struct FakeVideo {
    duration: f64,
    levels: Vec<Option<u8>>,
}

impl FakeVideo {
    pub fn new(duration: f64, levels: Vec<Option<u8>>) -> Self {
        Self { duration, levels }
    }

    pub fn constant(duration: f64, level: u8) -> Self {
        Self::new(duration, vec![Some(level)])
    }

    /// 每隔 `interval` 秒切换一次画面
    pub fn states(interval: f64, levels: &[u8]) -> Self {
        Self::new(
            interval * levels.len() as f64,
            levels.iter().map(|&l| Some(l)).collect(),
        )
    }
}

/// 句柄打开/释放计数
#[derive(Debug, Default)]
pub struct HandleProbe {
    pub opened: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub released: AtomicUsize,
}

impl HandleProbe {
    fn on_open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn on_release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeHandle {
    video: FakeVideo,
    probe: Option<Arc<HandleProbe>>,
    reads: usize,
    cancel_after: Option<(usize, CancelFlag)>,
}

impl FakeHandle {
    pub fn new(video: FakeVideo) -> Self {
        Self {
            video,
            probe: None,
            reads: 0,
            cancel_after: None,
        }
    }
}

impl VideoHandle for FakeHandle {
    fn info(&self) -> VideoInfo {
        VideoInfo {
            duration: self.video.duration,
            fps: 25.0,
            width: 8,
            height: 8,
        }
    }

    fn frame_at(&mut self, timestamp: f64) -> Result<RgbImage, FrameReadError> {
        self.reads += 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if self.reads >= *limit {
                flag.cancel();
            }
        }

        let n = self.video.levels.len();
        if n == 0 {
            return Err(FrameReadError::new(timestamp, "空视频"));
        }
        let slot = ((timestamp * n as f64 / self.video.duration).floor() as usize).min(n - 1);
        match self.video.levels[slot] {
            Some(level) => Ok(solid_frame(level)),
            None => Err(FrameReadError::new(timestamp, "损坏的数据包")),
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Some(probe) = &self.probe {
            probe.on_release();
        }
    }
}

/// 按路径返回预设视频的帧源
pub struct FakeFrameSource {
    videos: HashMap<PathBuf, FakeVideo>,
    fallback: FakeVideo,
    open_delay: Duration,
    cancel_after: Option<(usize, CancelFlag)>,
    pub probe: Arc<HandleProbe>,
}

impl FakeFrameSource {
    pub fn new(fallback: FakeVideo) -> Self {
        Self {
            videos: HashMap::new(),
            fallback,
            open_delay: Duration::ZERO,
            cancel_after: None,
            probe: Arc::new(HandleProbe::default()),
        }
    }

    pub fn with_video(mut self, path: impl Into<PathBuf>, video: FakeVideo) -> Self {
        self.videos.insert(path.into(), video);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// 读取第 `reads` 帧时触发取消
    pub fn cancel_after(mut self, reads: usize, flag: CancelFlag) -> Self {
        self.cancel_after = Some((reads, flag));
        self
    }
}

impl FrameSource for FakeFrameSource {
    fn open(
        &self,
        path: &Path,
        _tier: ResolutionTier,
    ) -> Result<Box<dyn VideoHandle>, ExtractError> {
        let video = self.videos.get(path).unwrap_or(&self.fallback).clone();
        self.probe.on_open();
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        Ok(Box::new(FakeHandle {
            video,
            probe: Some(Arc::clone(&self.probe)),
            reads: 0,
            cancel_after: self.cancel_after.clone(),
        }))
    }
}

/// 把地址原样当作本地路径，指定的地址拉取失败
#[derive(Default)]
pub struct FakeVideoSource {
    failing: HashSet<String>,
    pub fetches: AtomicUsize,
}

impl FakeVideoSource {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|u| u.to_string()).collect(),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl VideoSource for FakeVideoSource {
    fn fetch(&self, url: &str, _tier: ResolutionTier) -> Result<FetchedVideo, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(SourceError::Unavailable(format!("{url} 返回 404")));
        }
        Ok(FetchedVideo::local(PathBuf::from(url)))
    }
}

/// 同一画面 0.05，不同画面 0.8
pub struct StateEngine;

impl SimilarityEngine for StateEngine {
    fn score(&self, a: &RgbImage, b: &RgbImage) -> f64 {
        if a.get_pixel(0, 0) == b.get_pixel(0, 0) {
            0.05
        } else {
            0.8
        }
    }
}

/// 返回 `text-<亮度>`，可指定某个亮度识别失败
#[derive(Default)]
pub struct CountingOcr {
    fail_level: Option<u8>,
    pub calls: AtomicUsize,
}

impl CountingOcr {
    pub fn failing_on(level: u8) -> Self {
        Self {
            fail_level: Some(level),
            calls: AtomicUsize::new(0),
        }
    }
}

impl OcrEngine for CountingOcr {
    fn recognize(&self, image: &RgbImage) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let level = image.get_pixel(0, 0)[0];
        if self.fail_level == Some(level) {
            return Err(RecognitionError(format!("无法识别亮度 {level} 的画面")));
        }
        Ok(format!("text-{level}"))
    }
}

/// 把幻灯片时间戳写入 `deck.txt`
#[derive(Default)]
pub struct RecordingRenderer {
    pub rendered: Mutex<Vec<String>>,
}

impl DocumentRenderer for RecordingRenderer {
    fn render(
        &self,
        result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        let path = output_dir.join("deck.txt");
        let lines: Vec<String> = result
            .slides
            .iter()
            .map(|s| format!("{} {:.1}", s.index, s.timestamp))
            .collect();
        fs::write(&path, lines.join("\n"))?;
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(result.video_id.to_string());
        }
        Ok(vec![path])
    }
}

/// 写出半个文件后失败
pub struct FailingRenderer;

impl DocumentRenderer for FailingRenderer {
    fn render(
        &self,
        _result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        fs::write(output_dir.join("deck.pdf"), b"%PDF-1.5\n")?;
        Err(RenderError::Io(io::Error::new(io::ErrorKind::Other, "磁盘已满")))
    }
}
