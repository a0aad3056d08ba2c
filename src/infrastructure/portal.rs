//! 门户会话抽象 - 基础设施层
//!
//! 一个会话对应一个独立的浏览器（独立的 cookie 和验证码状态），
//! 只能被一个 worker 使用。

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// 一个已打开的成绩门户会话
#[async_trait]
pub trait PortalSession: Send {
    /// 回到查询表单并刷新验证码，返回验证码图片（PNG）
    async fn load_challenge(&mut self) -> Result<Vec<u8>>;

    /// 填写 USN 和验证码并提交
    ///
    /// # 返回
    /// 门户弹出的提示框内容；没有弹窗时为 None
    async fn submit(&mut self, usn: &str, captcha: &str) -> Result<Option<String>>;

    /// 等待结果页出现
    ///
    /// # 返回
    /// 结果页 HTML；超时返回 None
    async fn wait_for_results(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// 释放会话资源
    async fn close(&mut self);
}

/// 会话工厂
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn PortalSession>>;
}
