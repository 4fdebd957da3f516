use image::{imageops, GrayImage, Luma, RgbImage};
use std::io;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

use crate::error::RecognitionError;

/// 文字识别组件
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &RgbImage) -> Result<String, RecognitionError>;
}

/// 二值化阈值
const BINARY_THRESHOLD: u8 = 150;

/// 调用 tesseract 命令行进行识别
pub struct TesseractOcr {
    program: String,
    language: String,
    temp_dir: PathBuf,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "tesseract".to_string(),
            language: language.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// 灰度 + 二值化，文字识别对幻灯片这类高对比画面效果更好
    pub fn preprocess(image: &RgbImage) -> GrayImage {
        let mut gray = imageops::grayscale(image);
        for pixel in gray.pixels_mut() {
            *pixel = if pixel[0] > BINARY_THRESHOLD {
                Luma([255])
            } else {
                Luma([0])
            };
        }
        gray
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &RgbImage) -> Result<String, RecognitionError> {
        std::fs::create_dir_all(&self.temp_dir)
            .map_err(|e| RecognitionError(format!("创建临时目录失败: {e}")))?;

        let input = self
            .temp_dir
            .join(format!("slide-ocr-{}.png", uuid::Uuid::new_v4()));
        Self::preprocess(image)
            .save(&input)
            .map_err(|e| RecognitionError(format!("写入临时图片失败: {e}")))?;

        let output = Command::new(&self.program)
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg("6")
            .arg("--oem")
            .arg("3")
            .output();
        let _ = std::fs::remove_file(&input);

        let output = output.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => RecognitionError(format!("未找到 {}", self.program)),
            _ => RecognitionError(format!("执行 {} 失败: {e}", self.program)),
        })?;
        if !output.status.success() {
            return Err(RecognitionError(format!(
                "{} 退出码 {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("[识别] 识别到 {} 个字符", text.chars().count());
        Ok(text)
    }
}
