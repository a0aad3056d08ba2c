//! OCR 引擎 - 基础设施层
//!
//! 只负责"把一张 PNG 变成一串字符"，不关心验证码的清洗和长度规则。

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use tokio::process::Command;
use tracing::debug;

/// 识别模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// 单行文本，允许大小写字母和数字
    SingleLine,
    /// 单个词，只允许大写字母和数字
    SingleWord,
}

impl OcrMode {
    /// tesseract 的页面分割模式
    pub fn page_segmentation(self) -> &'static str {
        match self {
            OcrMode::SingleLine => "7",
            OcrMode::SingleWord => "8",
        }
    }

    pub fn whitelist(self) -> &'static str {
        match self {
            OcrMode::SingleLine => {
                "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789"
            }
            OcrMode::SingleWord => "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
        }
    }
}

/// OCR 能力
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 识别 PNG 图片中的文字，返回原始识别结果
    async fn recognize(&self, png: &[u8], mode: OcrMode) -> Result<String>;
}

/// 调用本地 tesseract 命令行
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: String,
}

impl TesseractCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, png: &[u8], mode: OcrMode) -> Result<String> {
        let mut image = tempfile::Builder::new()
            .prefix("captcha-")
            .suffix(".png")
            .tempfile()
            .context("无法创建验证码临时文件")?;
        image.write_all(png)?;
        image.flush()?;

        let output = Command::new(&self.command)
            .arg(image.path())
            .arg("stdout")
            .args(["--psm", mode.page_segmentation()])
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", mode.whitelist()))
            .output()
            .await
            .with_context(|| format!("无法执行 {}", self.command))?;

        if !output.status.success() {
            anyhow::bail!(
                "tesseract 退出码 {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("OCR ({:?}) 原始结果: {:?}", mode, text.trim());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_mode_is_uppercase_only() {
        assert!(!OcrMode::SingleWord.whitelist().contains('a'));
        assert!(OcrMode::SingleLine.whitelist().contains('a'));
        assert_eq!(OcrMode::SingleLine.page_segmentation(), "7");
        assert_eq!(OcrMode::SingleWord.page_segmentation(), "8");
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let ocr = TesseractCli::new("definitely-not-tesseract-binary");
        tokio_test::assert_err!(ocr.recognize(&[0u8; 4], OcrMode::SingleLine).await);
    }
}
