use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::RenderError;
use crate::metadata::format_timecode;
use crate::processor::ExtractionResult;
use crate::renderer::DocumentRenderer;

const STYLE: &str = r#"
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: "Segoe UI", Tahoma, sans-serif; background: #f5f5f5; color: #333; }
header { background: #2c3e50; color: #fff; padding: 16px; text-align: center; }
header h1 { font-size: 22px; }
.controls { display: flex; justify-content: center; align-items: center; gap: 16px;
  padding: 12px; background: #34495e; color: #fff; }
.controls button { padding: 8px 18px; border: none; border-radius: 4px;
  background: #3498db; color: #fff; font-size: 15px; cursor: pointer; }
.controls button:disabled { background: #95a5a6; cursor: not-allowed; }
main { max-width: 1200px; margin: 20px auto; padding: 0 16px; }
.slide { display: none; flex-direction: column; align-items: center;
  background: #fff; padding: 24px; border-radius: 8px; }
.slide.active { display: flex; }
.slide img { max-width: 100%; max-height: 70vh; box-shadow: 0 2px 10px rgba(0,0,0,.2); }
.slide h2 { margin-top: 16px; font-size: 16px; }
.slide pre { margin-top: 12px; width: 100%; white-space: pre-wrap; text-align: left;
  background: #f9f9f9; padding: 12px; border-radius: 4px; font-family: inherit; }
"#;

const SCRIPT: &str = r#"
(function () {
  var slides = document.querySelectorAll(".slide");
  var prev = document.getElementById("prev");
  var next = document.getElementById("next");
  var counter = document.getElementById("counter");
  var current = 0;
  function show(i) {
    if (i < 0 || i >= slides.length) return;
    slides[current].classList.remove("active");
    current = i;
    slides[current].classList.add("active");
    counter.textContent = (current + 1) + " / " + slides.length;
    prev.disabled = current === 0;
    next.disabled = current === slides.length - 1;
  }
  prev.addEventListener("click", function () { show(current - 1); });
  next.addEventListener("click", function () { show(current + 1); });
  document.addEventListener("keydown", function (e) {
    if (e.key === "ArrowLeft") show(current - 1);
    if (e.key === "ArrowRight") show(current + 1);
  });
  show(0);
})();
"#;

/// 单文件 HTML 幻灯片，图片以 data URI 内嵌，不依赖任何外部资源
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    fn png_data_uri(image: &RgbImage) -> Result<String, RenderError> {
        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )?;
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }

    fn build(result: &ExtractionResult) -> Result<String, RenderError> {
        let title = escape_html(&format!("Slides: {}", result.video_id));
        let total = result.slides.len();

        let mut body = String::new();
        for (position, slide) in result.slides.iter().enumerate() {
            let class = if position == 0 { "slide active" } else { "slide" };
            let _ = write!(
                body,
                "<section class=\"{class}\" data-index=\"{index}\">\n\
                 <img src=\"{src}\" alt=\"Slide {index}\">\n\
                 <h2>Slide {index} / {total} &middot; {time}</h2>\n",
                index = slide.index,
                src = Self::png_data_uri(&slide.image)?,
                time = format_timecode(slide.timestamp),
            );
            if let Some(text) = slide.text.as_deref() {
                let _ = writeln!(body, "<pre class=\"slide-text\">{}</pre>", escape_html(text));
            }
            body.push_str("</section>\n");
        }

        Ok(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
             <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <header><h1>{title}</h1></header>\n\
             <div class=\"controls\">\n<button id=\"prev\">&larr; Previous</button>\n\
             <span id=\"counter\">1 / {total}</span>\n\
             <button id=\"next\">Next &rarr;</button>\n</div>\n\
             <main>\n{body}</main>\n<script>{SCRIPT}</script>\n</body>\n</html>\n"
        ))
    }
}

impl DocumentRenderer for HtmlRenderer {
    fn render(
        &self,
        result: &ExtractionResult,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, RenderError> {
        if result.slides.is_empty() {
            return Err(RenderError::NoSlides);
        }

        let path = output_dir.join("slides.html");
        fs::write(&path, Self::build(result)?)?;
        info!("🌐 [渲染] 已生成 HTML: {}（{} 张）", path.display(), result.slides.len());
        Ok(vec![path])
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::VideoId;
    use crate::slide_detector::SlideCandidate;
    use crate::testing::solid_frame;
    use std::sync::Arc;

    fn deck() -> ExtractionResult {
        let mut result = ExtractionResult::new(VideoId::from_locator("intro.mp4"), "intro.mp4", "out");
        result.slides = vec![
            SlideCandidate {
                index: 1,
                timestamp: 0.0,
                frame_index: 0,
                image: Arc::new(solid_frame(20)),
                text: Some("if a < b && c".to_string()),
            },
            SlideCandidate {
                index: 2,
                timestamp: 65.0,
                frame_index: 13,
                image: Arc::new(solid_frame(220)),
                text: None,
            },
        ];
        result
    }

    #[test]
    fn test_deck_is_self_contained() {
        let dir = tempfile::tempdir().unwrap();
        let files = HtmlRenderer.render(&deck(), dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("slides.html")]);

        let html = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(html.matches("<section class=\"slide").count(), 2);
        assert_eq!(html.matches("data:image/png;base64,").count(), 2);
        assert!(!html.contains("src=\"http"));
        assert!(html.contains("ArrowRight"));
        assert!(html.contains("0:01:05"));
    }

    #[test]
    fn test_text_is_escaped() {
        let html = HtmlRenderer::build(&deck()).unwrap();
        assert!(html.contains("if a &lt; b &amp;&amp; c"));
        assert!(!html.contains("a < b"));
    }

    #[test]
    fn test_slides_keep_index_order() {
        let html = HtmlRenderer::build(&deck()).unwrap();
        let first = html.find("data-index=\"1\"").unwrap();
        let second = html.find("data-index=\"2\"").unwrap();
        assert!(first < second);
    }
}
