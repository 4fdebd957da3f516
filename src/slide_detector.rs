use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::frame_source::SampledFrame;
use crate::similarity::SimilarityEngine;

/// 检测出的一张幻灯片
#[derive(Debug, Clone, Serialize)]
pub struct SlideCandidate {
    /// 幻灯片序号（从 1 开始，按输出顺序递增）
    pub index: usize,
    /// 出现时间（秒）
    pub timestamp: f64,
    /// 对应的采样帧序号
    pub frame_index: u64,
    #[serde(skip)]
    pub image: Arc<RgbImage>,
    /// OCR 识别出的文字，未识别或识别失败时为空
    pub text: Option<String>,
}

/// 检测器状态
#[derive(Debug)]
enum DetectorState {
    AwaitingFirstFrame,
    /// 持有最近一次接受的帧作为比较基准
    Tracking { baseline: SampledFrame },
}

/// 幻灯片切换检测器
///
/// 只与最近一次接受的幻灯片比较：差异度达到阈值即视为新幻灯片并替换基准，
/// 否则丢弃该帧。判定一经做出不再回溯，内存中只保留一帧基准。
///
/// 缓慢渐变的画面（每一步都略低于阈值）不会触发新幻灯片，
/// 即使累计变化已经很大。
pub struct SlideDetector<'e> {
    engine: &'e dyn SimilarityEngine,
    threshold: f64,
    state: DetectorState,
    emitted: usize,
}

impl<'e> SlideDetector<'e> {
    pub fn new(engine: &'e dyn SimilarityEngine, threshold: f64) -> Self {
        Self {
            engine,
            threshold,
            state: DetectorState::AwaitingFirstFrame,
            emitted: 0,
        }
    }

    /// 已输出的幻灯片数量
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// 输入下一帧，若判定为新幻灯片则返回候选
    pub fn push(&mut self, frame: SampledFrame) -> Option<SlideCandidate> {
        let accepted = match &self.state {
            DetectorState::AwaitingFirstFrame => true,
            DetectorState::Tracking { baseline } => {
                let score = self.engine.score(&baseline.image, &frame.image);
                debug!(
                    "[检测] {:.2}s 与基准 {:.2}s 的差异度 {:.3}（阈值 {:.3}）",
                    frame.timestamp, baseline.timestamp, score, self.threshold
                );
                score >= self.threshold
            }
        };

        if !accepted {
            return None;
        }

        self.emitted += 1;
        let candidate = SlideCandidate {
            index: self.emitted,
            timestamp: frame.timestamp,
            frame_index: frame.index,
            image: Arc::clone(&frame.image),
            text: None,
        };
        self.state = DetectorState::Tracking { baseline: frame };
        Some(candidate)
    }
}

/// 对整段帧序列运行检测
pub fn detect(
    engine: &dyn SimilarityEngine,
    threshold: f64,
    frames: impl IntoIterator<Item = SampledFrame>,
) -> Vec<SlideCandidate> {
    let mut detector = SlideDetector::new(engine, threshold);
    frames
        .into_iter()
        .filter_map(|frame| detector.push(frame))
        .collect()
}
