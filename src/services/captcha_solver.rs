//! 验证码识别服务
//!
//! 门户的验证码字符是固定的灰色，背景是彩色噪点。
//! 先按 HSV 颜色范围把字符像素挑出来，再交给 OCR。
//! 识别结果只是"候选答案"，是否正确要由门户自己判定。

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat, Luma};
use tracing::{debug, warn};

use crate::infrastructure::{OcrEngine, OcrMode};

/// 字符像素的颜色范围（OpenCV 刻度：H 0-180，S/V 0-255）
const MAX_HUE: u8 = 10;
const MAX_SATURATION: u8 = 10;
const MIN_VALUE: u8 = 62;
const MAX_VALUE: u8 = 142;

/// 依次尝试的识别模式
const OCR_MODES: [OcrMode; 2] = [OcrMode::SingleLine, OcrMode::SingleWord];

/// 验证码识别器
pub struct CaptchaSolver {
    ocr: Arc<dyn OcrEngine>,
    min_len: usize,
}

impl CaptchaSolver {
    pub fn new(ocr: Arc<dyn OcrEngine>, min_len: usize) -> Self {
        Self { ocr, min_len }
    }

    /// 识别验证码
    ///
    /// # 参数
    /// - `png`: 验证码元素截图
    ///
    /// # 返回
    /// 第一个长度达标的识别结果；所有模式都失败时返回 None
    pub async fn solve(&self, png: &[u8]) -> Option<String> {
        let masked = match isolate_glyphs(png) {
            Ok(masked) => masked,
            Err(e) => {
                warn!("验证码图片处理失败: {}", e);
                return None;
            }
        };

        for mode in OCR_MODES {
            match self.ocr.recognize(&masked, mode).await {
                Ok(raw) => {
                    let text = clean_decode(&raw);
                    if text.chars().count() >= self.min_len {
                        debug!("验证码识别结果 ({:?}): {}", mode, text);
                        return Some(text);
                    }
                    debug!("识别结果过短 ({:?}): {:?}", mode, text);
                }
                Err(e) => debug!("OCR 失败 ({:?}): {}", mode, e),
            }
        }
        None
    }
}

/// 只保留字母和数字
pub fn clean_decode(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// 把字符像素涂黑、其余涂白，返回新的 PNG
pub fn isolate_glyphs(png: &[u8]) -> Result<Vec<u8>> {
    let rgb = image::load_from_memory_with_format(png, ImageFormat::Png)
        .context("无法解码验证码图片")?
        .to_rgb8();

    let mask = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        if is_glyph_pixel(r, g, b) {
            Luma([0])
        } else {
            Luma([255])
        }
    });

    let mut out = Vec::new();
    image::DynamicImage::ImageLuma8(mask)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .context("无法编码处理后的验证码")?;
    Ok(out)
}

fn is_glyph_pixel(r: u8, g: u8, b: u8) -> bool {
    let (h, s, v) = to_hsv(r, g, b);
    h <= MAX_HUE && s <= MAX_SATURATION && (MIN_VALUE..=MAX_VALUE).contains(&v)
}

/// RGB 转 HSV，刻度与 OpenCV 的 8 位图像一致
fn to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { 255.0 * delta / max };
    let h_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    ((h_deg / 2.0).round() as u8, s.round() as u8, max as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// 按顺序返回预设结果的 OCR
    struct ScriptedOcr {
        answers: Mutex<Vec<String>>,
        modes: Mutex<Vec<OcrMode>>,
    }

    impl ScriptedOcr {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
                modes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for ScriptedOcr {
        async fn recognize(&self, _png: &[u8], mode: OcrMode) -> Result<String> {
            self.modes.lock().unwrap().push(mode);
            self.answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("no more answers"))
        }
    }

    fn sample_png() -> Vec<u8> {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([100, 100, 100])); // 字符灰
        img.put_pixel(1, 0, Rgb([255, 255, 255])); // 背景白
        img.put_pixel(2, 0, Rgb([200, 30, 30])); // 彩色噪点
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn grey_glyphs_survive_the_mask() {
        let masked = isolate_glyphs(&sample_png()).unwrap();
        let img = image::load_from_memory(&masked).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0, [0]);
        assert_eq!(img.get_pixel(1, 0).0, [255]);
        assert_eq!(img.get_pixel(2, 0).0, [255]);
    }

    #[test]
    fn hsv_matches_opencv_scale() {
        assert_eq!(to_hsv(100, 100, 100), (0, 0, 100));
        assert_eq!(to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(to_hsv(0, 255, 0), (60, 255, 255));
        assert!(!is_glyph_pixel(40, 40, 40));
        assert!(is_glyph_pixel(142, 142, 142));
    }

    #[test]
    fn decode_keeps_alphanumerics() {
        assert_eq!(clean_decode(" aB3 d-9Q\n"), "aB3d9Q");
    }

    #[tokio::test]
    async fn falls_back_to_second_mode() {
        let ocr = Arc::new(ScriptedOcr::new(&["ab1", "XY12Z9"]));
        let solver = CaptchaSolver::new(ocr.clone(), 6);
        assert_eq!(solver.solve(&sample_png()).await.as_deref(), Some("XY12Z9"));
        assert_eq!(
            *ocr.modes.lock().unwrap(),
            vec![OcrMode::SingleLine, OcrMode::SingleWord]
        );
    }

    #[tokio::test]
    async fn first_good_decode_wins() {
        let ocr = Arc::new(ScriptedOcr::new(&["Ab12cd", "ZZZZZZ"]));
        let solver = CaptchaSolver::new(ocr.clone(), 6);
        assert_eq!(solver.solve(&sample_png()).await.as_deref(), Some("Ab12cd"));
        assert_eq!(ocr.modes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_decodes_fail() {
        let solver = CaptchaSolver::new(Arc::new(ScriptedOcr::new(&["ab", "c d"])), 6);
        assert!(solver.solve(&sample_png()).await.is_none());
    }

    #[tokio::test]
    async fn undecodable_image_fails() {
        let solver = CaptchaSolver::new(Arc::new(ScriptedOcr::new(&["ABCDEF"])), 6);
        assert!(solver.solve(b"not a png").await.is_none());
    }
}
