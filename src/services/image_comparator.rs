//! 图片比对服务 - 业务能力层
//!
//! 把两张截图放到同一画布上（左上角对齐，多出的区域透明），逐像素计算感知色差，
//! 输出差异图与 0 - 100 的相似度。任何解码/处理失败都降级为 0 分，
//! 并尽量复制一张原图作为差异图，保证前端总有图可显示。

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::AppResult;
use crate::models::report::round1;
use crate::models::ComparisonResult;
use image::{imageops, Rgba, RgbaImage};
use tracing::{error, info, warn};

/// YIQ 色差的最大可能值
const MAX_YIQ_DELTA: f64 = 35215.0;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const AA_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
/// 相同像素在差异图中淡化显示
const FADE_ALPHA: f64 = 0.1;

/// 图片比对器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageComparator {
    /// 0.0 - 1.0，越小越严格
    pub threshold: f64,
    /// true 时抗锯齿像素也计为差异
    pub include_anti_aliasing: bool,
}

impl ImageComparator {
    pub fn new(threshold: f64, include_anti_aliasing: bool) -> Self {
        Self {
            threshold,
            include_anti_aliasing,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.diff_threshold, config.include_anti_aliasing)
    }

    /// 在阻塞线程池中比对，返回完整结果
    pub async fn compare_files(
        &self,
        reference: PathBuf,
        submission: PathBuf,
        diff_out: PathBuf,
    ) -> ComparisonResult {
        let comparator = *self;
        let (r, s, d) = (reference.clone(), submission.clone(), diff_out.clone());
        let similarity = tokio::task::spawn_blocking(move || comparator.compare(&r, &s, &d))
            .await
            .unwrap_or_else(|e| {
                error!("比对任务异常终止: {}", e);
                0.0
            });
        ComparisonResult {
            similarity,
            reference_image: reference,
            submission_image: submission,
            diff_image: diff_out,
        }
    }

    /// 比对两张图片并写出差异图，返回相似度（保留一位小数）
    pub fn compare(&self, reference: &Path, submission: &Path, diff_out: &Path) -> f64 {
        if !reference.exists() || !submission.exists() {
            warn!(
                "图片缺失: {} 或 {}",
                reference.display(),
                submission.display()
            );
            copy_fallback(reference, submission, diff_out);
            return 0.0;
        }

        match self.try_compare(reference, submission, diff_out) {
            Ok(score) => score,
            Err(e) => {
                error!("图片比对失败: {}", e);
                copy_fallback(reference, submission, diff_out);
                0.0
            }
        }
    }

    fn try_compare(&self, reference: &Path, submission: &Path, diff_out: &Path) -> AppResult<f64> {
        let img1 = image::open(reference)?.to_rgba8();
        let img2 = image::open(submission)?.to_rgba8();

        let width = img1.width().max(img2.width());
        let height = img1.height().max(img2.height());

        let norm1 = normalize(&img1, width, height);
        let norm2 = normalize(&img2, width, height);

        let (diff, diff_pixels) = self.diff(&norm1, &norm2);
        diff.save(diff_out)?;

        let score = similarity(diff_pixels, u64::from(width) * u64::from(height));
        info!(
            "相似度: {:.1}% (尺寸: {}x{}, 差异像素: {})",
            score, width, height, diff_pixels
        );
        Ok(score)
    }

    /// 逐像素比较两张同尺寸图片，返回差异图与差异像素数
    pub fn diff(&self, img1: &RgbaImage, img2: &RgbaImage) -> (RgbaImage, u64) {
        let (width, height) = img1.dimensions();
        let max_delta = MAX_YIQ_DELTA * self.threshold * self.threshold;
        let mut output = RgbaImage::new(width, height);
        let mut diff_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                let p1 = img1.get_pixel(x, y);
                let p2 = img2.get_pixel(x, y);
                let delta = color_delta(p1, p2, false);

                if delta.abs() > max_delta {
                    if !self.include_anti_aliasing
                        && (antialiased(img1, x, y, img2) || antialiased(img2, x, y, img1))
                    {
                        output.put_pixel(x, y, AA_COLOR);
                    } else {
                        output.put_pixel(x, y, DIFF_COLOR);
                        diff_pixels += 1;
                    }
                } else {
                    output.put_pixel(x, y, gray_pixel(p1));
                }
            }
        }

        (output, diff_pixels)
    }
}

/// 把图片放到 `width` x `height` 画布的左上角，其余区域透明；尺寸已一致时直接借用原图
pub fn normalize(img: &RgbaImage, width: u32, height: u32) -> Cow<'_, RgbaImage> {
    if img.dimensions() == (width, height) {
        return Cow::Borrowed(img);
    }
    let mut canvas = RgbaImage::new(width, height);
    imageops::replace(&mut canvas, img, 0, 0);
    Cow::Owned(canvas)
}

/// (1 - 差异/总数) × 100，限制在 [0, 100] 并保留一位小数
pub fn similarity(diff_pixels: u64, total_pixels: u64) -> f64 {
    if total_pixels == 0 {
        return 0.0;
    }
    let score = (1.0 - diff_pixels as f64 / total_pixels as f64) * 100.0;
    round1(score.clamp(0.0, 100.0))
}

/// 降级：把存在的那张原图复制为差异图
fn copy_fallback(reference: &Path, submission: &Path, diff_out: &Path) {
    let source = [submission, reference].into_iter().find(|p| p.exists());
    if let Some(source) = source {
        if let Err(e) = std::fs::copy(source, diff_out) {
            warn!("复制降级差异图失败: {}", e);
        }
    }
}

// ========== 色差计算 ==========

fn blend(channel: f64, alpha: f64) -> f64 {
    255.0 + (channel - 255.0) * alpha
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// 混合到白色背景上的 RGB
fn blended_rgb(p: &Rgba<u8>) -> (f64, f64, f64) {
    let [r, g, b, a] = p.0;
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    if a < 255 {
        let alpha = f64::from(a) / 255.0;
        (blend(r, alpha), blend(g, alpha), blend(b, alpha))
    } else {
        (r, g, b)
    }
}

/// YIQ 感知色差；结果的符号表示哪一侧更亮。`y_only` 时只比较亮度
fn color_delta(p1: &Rgba<u8>, p2: &Rgba<u8>, y_only: bool) -> f64 {
    if p1 == p2 {
        return 0.0;
    }
    let (r1, g1, b1) = blended_rgb(p1);
    let (r2, g2, b2) = blended_rgb(p2);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;
    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

fn gray_pixel(p: &Rgba<u8>) -> Rgba<u8> {
    let [r, g, b, a] = p.0;
    let luma = rgb2y(f64::from(r), f64::from(g), f64::from(b));
    let value = blend(luma, FADE_ALPHA * f64::from(a) / 255.0).clamp(0.0, 255.0) as u8;
    Rgba([value, value, value, 255])
}

/// 3x3 邻域的边界
fn neighbourhood(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(width - 1),
        (y + 1).min(height - 1),
    )
}

/// 判断像素是否位于抗锯齿边缘：邻域中同时存在更亮和更暗的像素，
/// 且最亮或最暗的邻居在两张图中都处于大片同色区域内
fn antialiased(img: &RgbaImage, x1: u32, y1: u32, other: &RgbaImage) -> bool {
    let (width, height) = img.dimensions();
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let center = img.get_pixel(x1, y1);

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    let (mut min, mut max) = (0.0f64, 0.0f64);
    let (mut min_xy, mut max_xy) = ((0, 0), (0, 0));

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(center, img.get_pixel(x, y), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_xy = (x, y);
            } else if delta > max {
                max = delta;
                max_xy = (x, y);
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_xy.0, min_xy.1) && has_many_siblings(other, min_xy.0, min_xy.1))
        || (has_many_siblings(img, max_xy.0, max_xy.1)
            && has_many_siblings(other, max_xy.0, max_xy.1))
}

/// 邻域中是否有 3 个以上与中心完全相同的像素
fn has_many_siblings(img: &RgbaImage, x1: u32, y1: u32) -> bool {
    let (width, height) = img.dimensions();
    let (x0, y0, x2, y2) = neighbourhood(x1, y1, width, height);
    let center = img.get_pixel(x1, y1);

    let mut zeroes = u32::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            if img.get_pixel(x, y) == center {
                zeroes += 1;
                if zeroes > 2 {
                    return true;
                }
            }
        }
    }
    false
}
