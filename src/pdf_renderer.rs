use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::RenderError;
use crate::processor::ExtractionResult;
use crate::renderer::DocumentRenderer;
use crate::slide_detector::SlideCandidate;

/// US Letter（点）
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
/// 图片占页面可用区域的比例
const FIT_RATIO: f32 = 0.9;
const TEXT_FONT_SIZE: f32 = 8.0;

/// 每张幻灯片一页的 PDF，OCR 文字作为不可见文本层写入便于搜索
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    file_name: String,
    jpeg_quality: u8,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self {
            file_name: "slides.pdf".to_string(),
            jpeg_quality: 90,
        }
    }
}

impl PdfRenderer {
    fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, RenderError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality).encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )?;
        Ok(buffer)
    }

    fn add_page(
        &self,
        doc: &mut Document,
        pages_id: ObjectId,
        font_id: ObjectId,
        slide: &SlideCandidate,
    ) -> Result<ObjectId, RenderError> {
        let (width, height) = slide.image.dimensions();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            self.encode_jpeg(&slide.image)?,
        ));

        // 等比缩放并居中
        let ratio = (PAGE_WIDTH / width.max(1) as f32).min(PAGE_HEIGHT / height.max(1) as f32)
            * FIT_RATIO;
        let draw_width = width as f32 * ratio;
        let draw_height = height as f32 * ratio;
        let x = (PAGE_WIDTH - draw_width) / 2.0;
        let y = (PAGE_HEIGHT - draw_height) / 2.0;

        let image_name = format!("Slide{}", slide.index);
        let mut operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    draw_width.into(),
                    0.into(),
                    0.into(),
                    draw_height.into(),
                    x.into(),
                    y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(image_name.clone().into_bytes())]),
            Operation::new("Q", vec![]),
        ];
        if let Some(text) = slide.text.as_deref() {
            operations.extend(invisible_text(text));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { image_name => image_id },
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        Ok(page_id)
    }
}

/// 渲染模式 3（不填充不描边）的文字，只用于复制和搜索
fn invisible_text(text: &str) -> Vec<Operation> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), TEXT_FONT_SIZE.into()]),
        Operation::new("Tr", vec![3.into()]),
        Operation::new("TL", vec![(TEXT_FONT_SIZE + 2.0).into()]),
        Operation::new("Td", vec![10.into(), (PAGE_HEIGHT - 20.0).into()]),
    ];
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        operations.push(Operation::new("Tj", vec![Object::string_literal(latin1(line))]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

/// Helvetica 只覆盖 Latin-1，其余字符替换为 '?'
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

impl DocumentRenderer for PdfRenderer {
    fn render(
        &self,
        result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        if result.slides.is_empty() {
            return Err(RenderError::NoSlides);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::with_capacity(result.slides.len());
        for slide in &result.slides {
            kids.push(self.add_page(&mut doc, pages_id, font_id, slide)?.into());
        }

        let page_count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let path = output_dir.join(&self.file_name);
        doc.save(&path)?;
        info!("📄 [渲染] 已生成 PDF: {}（{} 页）", path.display(), page_count);
        Ok(vec![path])
    }
}
