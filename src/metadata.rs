use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{ExportFormat, ExtractConfig, ResolutionTier};
use crate::frame_source::VideoInfo;
use crate::processor::ExtractionResult;
use crate::renderer::slide_file_name;

/// 单张幻灯片的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideMetadata {
    /// 幻灯片序号（从 1 开始）
    pub index: usize,
    /// 出现时间（秒）
    pub timestamp: f64,
    /// 出现时间（H:MM:SS）
    pub timecode: String,
    /// 图片文件名（仅图片集导出）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file: Option<String>,
    /// OCR 文字
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// 整个幻灯片集的元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckMetadata {
    pub video_id: String,
    /// 原始地址
    pub source: String,
    pub duration: f64,
    pub fps: f64,
    /// 采样分辨率（宽x高）
    pub resolution: String,
    pub resolution_tier: ResolutionTier,
    pub frame_interval_seconds: f64,
    pub similarity_threshold: f64,
    pub frames_sampled: u64,
    pub frames_skipped: u64,
    pub export_format: ExportFormat,
    /// 生成的文档文件名
    pub documents: Vec<String>,
    pub slide_count: usize,
    pub slides: Vec<SlideMetadata>,
}

impl DeckMetadata {
    pub fn from_result(
        result: &ExtractionResult,
        config: &ExtractConfig,
        documents: &[PathBuf],
    ) -> Self {
        let info = result.video.unwrap_or(VideoInfo {
            duration: 0.0,
            fps: 0.0,
            width: 0,
            height: 0,
        });
        let total = result.slides.len();

        let slides = result
            .slides
            .iter()
            .map(|slide| SlideMetadata {
                index: slide.index,
                timestamp: slide.timestamp,
                timecode: format_timecode(slide.timestamp),
                image_file: (config.export_format == ExportFormat::Images)
                    .then(|| slide_file_name(slide.index, total)),
                text: slide.text.clone(),
            })
            .collect();

        Self {
            video_id: result.video_id.to_string(),
            source: result.source.clone(),
            duration: info.duration,
            fps: info.fps,
            resolution: format!("{}x{}", info.width, info.height),
            resolution_tier: config.resolution_tier,
            frame_interval_seconds: config.frame_interval_seconds,
            similarity_threshold: config.similarity_threshold,
            frames_sampled: result.frames_sampled,
            frames_skipped: result.frames_skipped,
            export_format: config.export_format,
            documents: documents
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
            slide_count: total,
            slides,
        }
    }

    /// 写入 `dir/metadata.json`
    pub fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join("metadata.json");
        let json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// 秒数格式化为 H:MM:SS
pub fn format_timecode(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::VideoId;
    use crate::slide_detector::SlideCandidate;
    use crate::testing::solid_frame;
    use std::sync::Arc;

    #[test]
    fn test_format_timecode() {
        assert_eq!(format_timecode(0.0), "0:00:00");
        assert_eq!(format_timecode(65.7), "0:01:05");
        assert_eq!(format_timecode(3725.0), "1:02:05");
        assert_eq!(format_timecode(-3.0), "0:00:00");
    }

    #[test]
    fn test_metadata_lists_image_files_for_image_sets() {
        let mut result = ExtractionResult::new(VideoId::from_locator("a.mp4"), "a.mp4", "out");
        result.slides = vec![SlideCandidate {
            index: 1,
            timestamp: 12.0,
            frame_index: 2,
            image: Arc::new(solid_frame(1)),
            text: Some("Intro".to_string()),
        }];
        let config = ExtractConfig {
            export_format: ExportFormat::Images,
            ..Default::default()
        };

        let meta = DeckMetadata::from_result(&result, &config, &[PathBuf::from("/x/slide_001.png")]);
        assert_eq!(meta.slide_count, 1);
        assert_eq!(meta.slides[0].image_file.as_deref(), Some("slide_001.png"));
        assert_eq!(meta.slides[0].timecode, "0:00:12");
        assert_eq!(meta.documents, vec!["slide_001.png"]);

        let dir = tempfile::tempdir().unwrap();
        let path = meta.write_to(dir.path()).unwrap();
        let parsed: DeckMetadata =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.slides[0].text.as_deref(), Some("Intro"));
    }
}
