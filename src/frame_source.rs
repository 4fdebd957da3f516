use image::RgbImage;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ResolutionTier;
use crate::error::{ExtractError, FrameReadError};

/// 视频基础信息
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoInfo {
    /// 时长（秒）
    pub duration: f64,
    /// 原始帧率
    pub fps: f64,
    /// 输出帧宽度（已按分辨率档位缩放）
    pub width: u32,
    /// 输出帧高度（已按分辨率档位缩放）
    pub height: u32,
}

/// 已打开、可随机定位的视频流
///
/// 句柄由打开它的任务独占，drop 即释放底层解码资源。
pub trait VideoHandle {
    fn info(&self) -> VideoInfo;

    /// 读取 `timestamp` 秒处（或之后最近）的一帧
    fn frame_at(&mut self, timestamp: f64) -> Result<RgbImage, FrameReadError>;
}

/// 打开本地视频文件的组件
pub trait FrameSource: Send + Sync {
    fn open(
        &self,
        path: &Path,
        tier: ResolutionTier,
    ) -> Result<Box<dyn VideoHandle>, ExtractError>;
}

/// 采样得到的一帧，创建后不可变
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// 在采样网格中的序号（从 0 开始，跳过的帧会留下空缺）
    pub index: u64,
    /// 时间戳（秒）
    pub timestamp: f64,
    pub image: Arc<RgbImage>,
}

/// 按固定时间间隔惰性采样的帧序列
///
/// 只能前进、不可重来；解码失败的帧会被跳过并计数，
/// 跳帧比例超过 `max_skip_ratio` 时产出 `UnreadableVideo` 并结束。
pub struct FrameSampler<'h> {
    handle: &'h mut dyn VideoHandle,
    interval: f64,
    duration: f64,
    planned: u64,
    next_step: u64,
    produced: u64,
    skipped: u64,
    max_skip_ratio: f64,
    finished: bool,
}

/// 在 `handle` 上以 `interval` 秒为间隔开始采样
pub fn sample<'h>(
    handle: &'h mut dyn VideoHandle,
    interval: f64,
    max_skip_ratio: f64,
) -> Result<FrameSampler<'h>, ExtractError> {
    if !(interval.is_finite() && interval > 0.0) {
        return Err(ExtractError::unreadable(format!(
            "非法的采样间隔: {interval}"
        )));
    }

    let info = handle.info();
    if !(info.duration.is_finite() && info.duration > 0.0) {
        return Err(ExtractError::unreadable("视频时长为 0"));
    }

    let planned = ((info.duration / interval).ceil() as u64).max(1);
    debug!(
        "📊 [采样] 时长 {:.2}s, 间隔 {:.2}s, 计划采样 {} 帧",
        info.duration, interval, planned
    );

    Ok(FrameSampler {
        handle,
        interval,
        duration: info.duration,
        planned,
        next_step: 0,
        produced: 0,
        skipped: 0,
        max_skip_ratio,
        finished: false,
    })
}

impl FrameSampler<'_> {
    /// 计划采样的帧数
    pub fn planned(&self) -> u64 {
        self.planned
    }

    /// 已成功产出的帧数
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// 已跳过的帧数
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn skip_ratio(&self) -> f64 {
        self.skipped as f64 / self.planned as f64
    }
}

impl Iterator for FrameSampler<'_> {
    type Item = Result<SampledFrame, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        while self.next_step < self.planned {
            let step = self.next_step;
            self.next_step += 1;

            let timestamp = step as f64 * self.interval;
            if timestamp >= self.duration {
                break;
            }

            match self.handle.frame_at(timestamp) {
                Ok(image) => {
                    self.produced += 1;
                    return Some(Ok(SampledFrame {
                        index: step,
                        timestamp,
                        image: Arc::new(image),
                    }));
                }
                Err(err) => {
                    self.skipped += 1;
                    warn!("⚠️  [采样] 跳过不可读帧: {}", err);

                    if self.skip_ratio() > self.max_skip_ratio {
                        self.finished = true;
                        return Some(Err(ExtractError::unreadable(format!(
                            "跳帧比例 {:.0}% 超过容忍度 {:.0}%（{}/{}）",
                            self.skip_ratio() * 100.0,
                            self.max_skip_ratio * 100.0,
                            self.skipped,
                            self.planned
                        ))));
                    }
                }
            }
        }

        self.finished = true;
        if self.produced == 0 {
            return Some(Err(ExtractError::unreadable("没有读取到任何视频帧")));
        }
        None
    }
}
