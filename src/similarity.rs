use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// 帧差异度计算
///
/// 返回 0.0-1.0 之间的值：同一帧为 0，完全不同的帧趋近 1。
/// 实现必须是纯函数且满足对称性；阈值的含义由调用方决定。
pub trait SimilarityEngine: Send + Sync {
    fn score(&self, a: &RgbImage, b: &RgbImage) -> f64;
}

// SSIM 稳定常数（动态范围 255）
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// 感知差异引擎
///
/// 两帧先统一缩放为 320x180 的灰度图并轻微模糊，再组合三种度量：
/// 1. 分块结构差异：有内容的块中 SSIM 明显下降的比例（取平方根）。
///    光标、时间戳角标只改动一两个块；换页时大部分文字块都会变化，
///    即使版式完全相同
/// 2. 灰度分布的推土机距离，对整体亮度/配色切换敏感，对编码噪声不敏感
/// 3. 平均像素差异
#[derive(Debug, Clone)]
pub struct PerceptualSimilarity {
    width: u32,
    height: u32,
    block: u32,
    /// 缩放后的高斯模糊半径，抵消重采样带来的边缘差异
    blur_sigma: f32,
    /// 1 - SSIM 超过该值的块记为已变化
    change_cutoff: f64,
    /// 结构差异的分母至少为总块数的这一比例
    min_active_ratio: f64,
    structural_weight: f64,
    histogram_weight: f64,
    pixel_weight: f64,
}

impl Default for PerceptualSimilarity {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            block: 8,
            blur_sigma: 1.0,
            change_cutoff: 0.25,
            min_active_ratio: 0.1,
            structural_weight: 0.7,
            histogram_weight: 0.15,
            pixel_weight: 0.15,
        }
    }
}

impl PerceptualSimilarity {
    pub fn new() -> Self {
        Self::default()
    }

    /// 统一到相同尺寸与灰度空间
    fn normalize(&self, img: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(img);
        let resized = if gray.dimensions() == (self.width, self.height) {
            gray
        } else {
            imageops::resize(&gray, self.width, self.height, FilterType::Triangle)
        };
        imageops::blur(&resized, self.blur_sigma)
    }

    /// 分块结构差异
    fn structural_difference(&self, img1: &GrayImage, img2: &GrayImage) -> f64 {
        let block = self.block;
        let blocks_x = self.width / block;
        let blocks_y = self.height / block;
        let total_blocks = (blocks_x * blocks_y).max(1) as f64;

        let mut changed_blocks = 0u32;
        let mut active_blocks = 0u32;

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let stats = BlockStats::compute(img1, img2, bx * block, by * block, block);
                if !stats.is_active() {
                    continue;
                }
                active_blocks += 1;
                if 1.0 - stats.ssim() > self.change_cutoff {
                    changed_blocks += 1;
                }
            }
        }

        let denominator = (active_blocks as f64)
            .max(total_blocks * self.min_active_ratio)
            .max(1.0);
        (changed_blocks as f64 / denominator).clamp(0.0, 1.0).sqrt()
    }

    /// 灰度分布差异：两条累积直方图之间的面积，归一化到 0-1
    fn histogram_difference(&self, img1: &GrayImage, img2: &GrayImage) -> f64 {
        let mut hist1 = [0u32; 256];
        let mut hist2 = [0u32; 256];

        for pixel in img1.pixels() {
            hist1[pixel[0] as usize] += 1;
        }
        for pixel in img2.pixels() {
            hist2[pixel[0] as usize] += 1;
        }

        let total1 = (img1.width() * img1.height()).max(1) as f64;
        let total2 = (img2.width() * img2.height()).max(1) as f64;
        let (mut cdf1, mut cdf2) = (0.0, 0.0);
        let mut area = 0.0;
        for (&h1, &h2) in hist1.iter().zip(hist2.iter()).take(255) {
            cdf1 += h1 as f64 / total1;
            cdf2 += h2 as f64 / total2;
            area += (cdf1 - cdf2).abs();
        }

        area / 255.0
    }

    /// 计算像素差异
    fn pixel_difference(&self, img1: &GrayImage, img2: &GrayImage) -> f64 {
        let total_pixels = (img1.width() * img1.height()).max(1) as f64;
        let diff_sum: u64 = img1
            .pixels()
            .zip(img2.pixels())
            .map(|(p1, p2)| (p1[0] as i32 - p2[0] as i32).unsigned_abs() as u64)
            .sum();

        diff_sum as f64 / (total_pixels * 255.0)
    }
}

impl SimilarityEngine for PerceptualSimilarity {
    fn score(&self, a: &RgbImage, b: &RgbImage) -> f64 {
        let gray1 = self.normalize(a);
        let gray2 = self.normalize(b);

        if gray1.as_raw() == gray2.as_raw() {
            return 0.0;
        }

        let structural = self.structural_difference(&gray1, &gray2);
        let histogram = self.histogram_difference(&gray1, &gray2);
        let pixel = self.pixel_difference(&gray1, &gray2);

        (structural * self.structural_weight
            + histogram * self.histogram_weight
            + pixel * self.pixel_weight)
            .clamp(0.0, 1.0)
    }
}

/// 一对对齐块的一阶、二阶统计量
struct BlockStats {
    mean1: f64,
    mean2: f64,
    var1: f64,
    var2: f64,
    covar: f64,
}

impl BlockStats {
    fn compute(img1: &GrayImage, img2: &GrayImage, x0: u32, y0: u32, size: u32) -> Self {
        let n = (size * size) as f64;
        let (mut sum1, mut sum2, mut sq1, mut sq2, mut cross) = (0.0, 0.0, 0.0, 0.0, 0.0);

        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let p1 = img1.get_pixel(x, y)[0] as f64;
                let p2 = img2.get_pixel(x, y)[0] as f64;
                sum1 += p1;
                sum2 += p2;
                sq1 += p1 * p1;
                sq2 += p2 * p2;
                cross += p1 * p2;
            }
        }

        let mean1 = sum1 / n;
        let mean2 = sum2 / n;
        Self {
            mean1,
            mean2,
            var1: (sq1 / n - mean1 * mean1).max(0.0),
            var2: (sq2 / n - mean2 * mean2).max(0.0),
            covar: cross / n - mean1 * mean2,
        }
    }

    /// 两块都是平坦且亮度一致的背景时不参与平均
    fn is_active(&self) -> bool {
        const FLAT_VARIANCE: f64 = 1.0;
        const SAME_MEAN: f64 = 2.0;
        !(self.var1 < FLAT_VARIANCE
            && self.var2 < FLAT_VARIANCE
            && (self.mean1 - self.mean2).abs() < SAME_MEAN)
    }

    fn ssim(&self) -> f64 {
        let numerator = (2.0 * self.mean1 * self.mean2 + C1) * (2.0 * self.covar + C2);
        let denominator = (self.mean1 * self.mean1 + self.mean2 * self.mean2 + C1)
            * (self.var1 + self.var2 + C2);
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// 白底幻灯片，按给定矩形画黑色“文字行”
    fn slide(width: u32, height: u32, bars: &[(u32, u32, u32, u32)]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let inside = bars
                .iter()
                .any(|&(x0, y0, x1, y1)| x >= x0 && x < x1 && y >= y0 && y < y1);
            if inside {
                Rgb([20, 20, 20])
            } else {
                Rgb([250, 250, 250])
            }
        })
    }

    fn title_slide() -> RgbImage {
        slide(640, 360, &[(64, 48, 576, 96), (64, 160, 448, 176), (64, 208, 512, 224)])
    }

    fn diagram_slide() -> RgbImage {
        slide(640, 360, &[(320, 32, 352, 320), (96, 256, 288, 288), (400, 64, 608, 96)])
    }

    /// 固定种子的线性同余序列，生成可复现的“字形”
    struct Lcg(u64);

    impl Lcg {
        fn new(seed: u64) -> Self {
            Lcg(seed.wrapping_mul(2).wrapping_add(1))
        }

        fn below(&mut self, n: u32) -> u32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) % n as u64) as u32
        }
    }

    fn fill(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0..y1.min(img.height()) {
            for x in x0..x1.min(img.width()) {
                img.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
    }

    /// 一行由随机笔画组成的文字，约 15% 的位置是空格
    fn text_line(img: &mut RgbImage, x: u32, y: u32, chars: u32, seed: u64, glyph_h: u32) {
        let glyph_w = glyph_h * 3 / 5;
        let mut rng = Lcg::new(seed);
        let mut cx = x;
        for _ in 0..chars {
            if rng.below(100) < 15 {
                cx += glyph_w;
                continue;
            }
            for _ in 0..2 + rng.below(3) {
                if rng.below(2) == 0 {
                    let yy = y + rng.below(glyph_h - 2);
                    let x0 = cx + rng.below(glyph_w / 2);
                    let x1 = cx + glyph_w / 2 + rng.below(glyph_w / 2);
                    fill(img, x0, yy, x1 + 1, yy + 2);
                } else {
                    let xx = cx + rng.below(glyph_w - 2);
                    let y0 = y + rng.below(glyph_h / 2);
                    let y1 = y + glyph_h / 2 + rng.below(glyph_h / 2);
                    fill(img, xx, y0, xx + 2, y1 + 1);
                }
            }
            cx += glyph_w;
        }
    }

    /// 1280x720 的文字幻灯片；`lines` 为 (x, y, 字数, 字高)，同一版式换种子即换文字
    fn text_slide(lines: &[(u32, u32, u32, u32)], seed: u64) -> RgbImage {
        let mut img = RgbImage::from_pixel(1280, 720, Rgb([250, 250, 250]));
        for (i, &(x, y, chars, glyph_h)) in lines.iter().enumerate() {
            text_line(&mut img, x, y, chars, seed * 100 + i as u64, glyph_h);
        }
        img
    }

    const BULLET_LAYOUT: &[(u32, u32, u32, u32)] = &[
        (120, 80, 40, 34),
        (140, 200, 50, 20),
        (140, 260, 45, 20),
        (140, 320, 52, 20),
        (140, 380, 38, 20),
        (140, 440, 48, 20),
    ];

    #[test]
    fn test_identical_frames_score_zero() {
        let engine = PerceptualSimilarity::new();
        let frame = title_slide();
        assert_eq!(engine.score(&frame, &frame), 0.0);
        assert_eq!(engine.score(&frame, &frame.clone()), 0.0);
    }

    #[test]
    fn test_score_is_symmetric() {
        let engine = PerceptualSimilarity::new();
        let a = title_slide();
        let b = diagram_slide();
        assert_eq!(engine.score(&a, &b), engine.score(&b, &a));
    }

    #[test]
    fn test_cursor_sized_change_scores_low() {
        let engine = PerceptualSimilarity::new();
        let base = title_slide();
        let mut with_cursor = base.clone();
        for y in 300..312 {
            for x in 500..508 {
                with_cursor.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }

        let score = engine.score(&base, &with_cursor);
        assert!(score > 0.0);
        assert!(score < 0.1, "cursor change scored {score}");
    }

    #[test]
    fn test_new_slide_scores_high() {
        let engine = PerceptualSimilarity::new();
        let score = engine.score(&title_slide(), &diagram_slide());
        assert!(score > 0.3, "slide change scored {score}");
    }

    #[test]
    fn test_same_layout_with_new_words_scores_high() {
        let engine = PerceptualSimilarity::new();
        let score = engine.score(&text_slide(BULLET_LAYOUT, 1), &text_slide(BULLET_LAYOUT, 2));
        assert!(score > 0.3, "same-layout slide change scored {score}");
    }

    #[test]
    fn test_same_title_with_different_bullets_scores_above_default_threshold() {
        let engine = PerceptualSimilarity::new();
        let shorter: Vec<_> = BULLET_LAYOUT
            .iter()
            .zip([40, 30, 55, 20, 44, 26])
            .map(|(&(x, y, _, h), chars)| (x, y, chars, h))
            .collect();

        let score = engine.score(&text_slide(BULLET_LAYOUT, 1), &text_slide(&shorter, 1));
        let threshold = crate::config::ExtractConfig::default().similarity_threshold;
        assert!(score > threshold, "bullet change scored {score}");
    }

    #[test]
    fn test_cursor_on_text_slide_stays_below_default_threshold() {
        let engine = PerceptualSimilarity::new();
        let base = text_slide(BULLET_LAYOUT, 1);
        let mut with_cursor = base.clone();
        fill(&mut with_cursor, 900, 600, 916, 624);

        let score = engine.score(&base, &with_cursor);
        let threshold = crate::config::ExtractConfig::default().similarity_threshold;
        assert!(score < threshold / 2.0, "cursor on text slide scored {score}");
    }

    #[test]
    fn test_encoding_noise_scores_low() {
        let engine = PerceptualSimilarity::new();
        let base = text_slide(BULLET_LAYOUT, 1);
        let mut rng = Lcg::new(7);
        let noisy = RgbImage::from_fn(base.width(), base.height(), |x, y| {
            let v = base.get_pixel(x, y)[0] as i32 + rng.below(9) as i32 - 4;
            let v = v.clamp(0, 255) as u8;
            Rgb([v, v, v])
        });

        let score = engine.score(&base, &noisy);
        assert!(score < 0.05, "noise scored {score}");
    }

    #[test]
    fn test_different_sizes_are_normalized() {
        let engine = PerceptualSimilarity::new();
        let small = slide(320, 180, &[(32, 32, 288, 64), (32, 96, 224, 112)]);
        let large = slide(640, 360, &[(64, 64, 576, 128), (64, 192, 448, 224)]);
        let score = engine.score(&small, &large);
        assert!(score < 0.15, "rescaled copy scored {score}");
    }

    #[test]
    fn test_score_stays_in_unit_range() {
        let engine = PerceptualSimilarity::new();
        let black = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let white = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        let score = engine.score(&black, &white);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.9, "black/white scored {score}");
    }
}
