use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ExportFormat;
use crate::error::RenderError;
use crate::html_renderer::HtmlRenderer;
use crate::pdf_renderer::PdfRenderer;
use crate::processor::ExtractionResult;

/// 文档渲染组件
///
/// 渲染器只向 `output_dir` 写文件，返回写出的文档路径。
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError>;
}

/// 按导出格式选择渲染器
pub fn renderer_for(format: ExportFormat) -> Arc<dyn DocumentRenderer> {
    match format {
        ExportFormat::Pdf => Arc::new(PdfRenderer::default()),
        ExportFormat::Html => Arc::new(HtmlRenderer),
        ExportFormat::Images => Arc::new(ImageSetRenderer),
    }
}

/// 幻灯片图片文件名，序号至少补齐到 3 位
pub fn slide_file_name(index: usize, total: usize) -> String {
    let width = total.to_string().len().max(3);
    format!("slide_{index:0width$}.png")
}

/// 每张幻灯片一个 PNG 文件
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageSetRenderer;

impl DocumentRenderer for ImageSetRenderer {
    fn render(
        &self,
        result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        if result.slides.is_empty() {
            return Err(RenderError::NoSlides);
        }

        let total = result.slides.len();
        let mut files = Vec::with_capacity(total);
        for slide in &result.slides {
            let path = output_dir.join(slide_file_name(slide.index, total));
            slide.image.save(&path)?;
            debug!("💾 [渲染] 已保存 {}", path.display());
            files.push(path);
        }
        Ok(files)
    }
}

/// 在同级隐藏目录中渲染，成功后整体改名为 `target`
///
/// 失败时删除暂存目录，`target` 不会出现半成品。
pub fn publish<F>(target: &Path, render: F) -> Result<Vec<PathBuf>, RenderError>
where
    F: FnOnce(&Path) -> Result<Vec<PathBuf>, RenderError>,
{
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    fs::create_dir_all(parent)?;
    let staging = parent.join(format!(".{}.partial-{}", name, uuid::Uuid::new_v4()));
    fs::create_dir(&staging)?;

    let outcome = render(&staging).and_then(|files| {
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::rename(&staging, target)?;
        Ok(files
            .into_iter()
            .map(|file| match file.strip_prefix(&staging) {
                Ok(relative) => target.join(relative),
                Err(_) => file,
            })
            .collect())
    });

    if outcome.is_err() && staging.exists() {
        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!("⚠️  [渲染] 清理暂存目录失败 {}: {}", staging.display(), e);
        }
    }
    outcome
}
