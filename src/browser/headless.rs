//! 无头浏览器会话
//!
//! 每个会话启动一个独立的浏览器进程，使用独立的用户数据目录，
//! 会话之间不共享 cookie，也不共享验证码。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, PortalSelectors};
use crate::infrastructure::{JsExecutor, PortalSession, SessionFactory};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 启动 Chrome 会话的工厂
#[derive(Clone)]
pub struct ChromeSessionFactory {
    chrome_executable: Option<String>,
    selectors: PortalSelectors,
    challenge_settle: Duration,
    submit_settle: Duration,
}

impl ChromeSessionFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_executable: config.chrome_executable.clone(),
            selectors: PortalSelectors::default(),
            challenge_settle: config.challenge_settle(),
            submit_settle: config.submit_settle(),
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self, url: &str) -> Result<Box<dyn PortalSession>> {
        let session = launch_headless_session(self, url).await?;
        Ok(Box::new(session))
    }
}

/// 启动无头浏览器并导航到查询页面
async fn launch_headless_session(factory: &ChromeSessionFactory, url: &str) -> Result<ChromeSession> {
    debug!("🚀 启动无头浏览器, 目标 URL: {}", url);

    let profile = tempfile::Builder::new()
        .prefix("results-harvester-")
        .tempdir()
        .context("无法创建浏览器用户数据目录")?;

    let mut builder = BrowserConfig::builder()
        .new_headless_mode()
        .user_data_dir(profile.path())
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--remote-debugging-port=0",
        ]);
    if let Some(path) = &factory.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        anyhow::anyhow!("配置无头浏览器失败: {}", e)
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        anyhow::anyhow!("启动无头浏览器失败: {}", e)
    })?;

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    let page = browser.new_page(url).await.map_err(|e| {
        error!("创建页面失败: {}", e);
        anyhow::anyhow!("创建页面失败: {}", e)
    })?;

    // 门户用 alert() 报告"验证码错误"和"USN 无效"，必须先接住再关闭
    let dialog = Arc::new(Mutex::new(None));
    let mut dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;
    let dialog_slot = Arc::clone(&dialog);
    let dialog_page = page.clone();
    let dialog_task = tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            debug!("门户弹窗: {}", event.message);
            if let Ok(mut slot) = dialog_slot.lock() {
                *slot = Some(event.message.clone());
            }
            if let Err(e) = dialog_page
                .execute(HandleJavaScriptDialogParams::new(true))
                .await
            {
                warn!("关闭弹窗失败: {}", e);
            }
        }
    });

    info!("✅ 无头浏览器已导航到: {}", url);

    Ok(ChromeSession {
        url: url.to_string(),
        browser,
        executor: JsExecutor::new(page),
        selectors: factory.selectors.clone(),
        challenge_settle: factory.challenge_settle,
        submit_settle: factory.submit_settle,
        dialog,
        needs_reload: false,
        handler_task,
        dialog_task,
        _profile: profile,
    })
}

/// 一个 Chrome 会话
pub struct ChromeSession {
    url: String,
    browser: Browser,
    executor: JsExecutor,
    selectors: PortalSelectors,
    challenge_settle: Duration,
    submit_settle: Duration,
    dialog: Arc<Mutex<Option<String>>>,
    /// 提交过表单后页面状态未知，下次取验证码前需要重新打开表单
    needs_reload: bool,
    handler_task: JoinHandle<()>,
    dialog_task: JoinHandle<()>,
    _profile: TempDir,
}

impl ChromeSession {
    fn take_dialog(&self) -> Option<String> {
        self.dialog.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[async_trait]
impl PortalSession for ChromeSession {
    async fn load_challenge(&mut self) -> Result<Vec<u8>> {
        let page = self.executor.page();
        if self.needs_reload {
            page.goto(self.url.as_str()).await?;
            self.needs_reload = false;
        } else if let Ok(refresh) = page.find_element(self.selectors.captcha_refresh.as_str()).await
        {
            refresh.click().await?;
        }
        sleep(self.challenge_settle).await;
        self.take_dialog();

        let image = page
            .find_element(self.selectors.captcha_image.as_str())
            .await
            .context("找不到验证码图片")?;
        let png = image.screenshot(CaptureScreenshotFormat::Png).await?;
        Ok(png)
    }

    async fn submit(&mut self, usn: &str, captcha: &str) -> Result<Option<String>> {
        self.take_dialog();
        if !self.executor.set_value(&self.selectors.usn_input, usn).await? {
            anyhow::bail!("找不到 USN 输入框: {}", self.selectors.usn_input);
        }
        if !self
            .executor
            .set_value(&self.selectors.captcha_input, captcha)
            .await?
        {
            anyhow::bail!("找不到验证码输入框: {}", self.selectors.captcha_input);
        }

        self.needs_reload = true;
        self.executor
            .page()
            .find_element(self.selectors.submit_button.as_str())
            .await?
            .click()
            .await?;

        sleep(self.submit_settle).await;
        Ok(self.take_dialog())
    }

    async fn wait_for_results(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.executor.exists(&self.selectors.results_marker).await? {
                let html = self.executor.page().content().await?;
                return Ok(Some(html));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&mut self) {
        self.dialog_task.abort();
        if let Err(e) = self.browser.close().await {
            debug!("关闭浏览器失败: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}
