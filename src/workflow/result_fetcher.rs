//! 成绩抓取流程 - 流程层
//!
//! 核心职责：驱动一个浏览器会话，把一个学生的成绩页拿到手
//!
//! 状态机：
//!
//! ```text
//! Start ──取验证码/识别──▶ ChallengeLoaded ──提交──▶ Submitted ──等待──▶ Loaded
//!   ▲                          │ 识别失败               │ 弹窗               │
//!   └──────────────────────────┴─ 验证码错误/其他 ◀──────┘ 超时 ◀─────────────┘
//! ```
//!
//! - 弹窗提示 USN 无效：立即失败，不再重试
//! - 验证码错误、未知弹窗、等待超时：消耗一次预算后回到 Start
//! - 预算耗尽：按最后一次失败原因返回 Timeout 或 ChallengeExhausted

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FetchFailure;
use crate::infrastructure::{PortalSession, SessionFactory};
use crate::models::ParsedPage;
use crate::services::{CaptchaSolver, ResultParser};
use crate::utils::truncate_text;
use crate::workflow::student_ctx::StudentCtx;

/// 抓取状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Start,
    ChallengeLoaded { captcha: String },
    Submitted,
    Loaded { html: String },
}

/// 门户弹窗的含义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalVerdict {
    InvalidIdentifier,
    WrongCaptcha,
    Other,
}

impl ModalVerdict {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("captcha") {
            ModalVerdict::WrongCaptcha
        } else if lower.contains("seat number") && lower.contains("invalid") {
            ModalVerdict::InvalidIdentifier
        } else {
            ModalVerdict::Other
        }
    }
}

/// 最后一次失败的类型，预算耗尽时决定返回哪种失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastFailure {
    Challenge,
    Timeout,
}

/// 成绩抓取器
///
/// - 每个学生独占一个会话，结束后立即关闭
/// - 不写数据库，只返回解析好的结果页
pub struct ResultFetcher {
    sessions: Arc<dyn SessionFactory>,
    solver: Arc<CaptchaSolver>,
    parser: Arc<ResultParser>,
    max_attempts: u32,
    result_wait: Duration,
}

impl ResultFetcher {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        solver: Arc<CaptchaSolver>,
        parser: Arc<ResultParser>,
        config: &Config,
    ) -> Self {
        Self {
            sessions,
            solver,
            parser,
            max_attempts: config.fetch_max_attempts.max(1),
            result_wait: config.result_wait(),
        }
    }

    /// 抓取一个学生的成绩页
    ///
    /// # 参数
    /// - `url`: 查询页面
    /// - `ctx`: 学生上下文
    ///
    /// # 返回
    /// 至少包含一行成绩的结果页，或者失败原因
    pub async fn fetch(&self, url: &str, ctx: &StudentCtx) -> Result<ParsedPage, FetchFailure> {
        let mut session = self.open_session(url, ctx).await?;
        let outcome = self.drive(&mut *session, ctx).await;
        session.close().await;
        outcome
    }

    async fn open_session(
        &self,
        url: &str,
        ctx: &StudentCtx,
    ) -> Result<Box<dyn PortalSession>, FetchFailure> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.sessions.open(url).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!("{} ⚠️ 打开会话失败 ({}/{}): {}", ctx, attempt, self.max_attempts, e);
                    last_error = e.to_string();
                }
            }
        }
        Err(FetchFailure::SessionUnavailable(last_error))
    }

    /// 状态机主循环
    async fn drive(
        &self,
        session: &mut dyn PortalSession,
        ctx: &StudentCtx,
    ) -> Result<ParsedPage, FetchFailure> {
        let mut attempts = 0;
        let mut last = LastFailure::Challenge;
        let mut state = FetchState::Start;

        loop {
            state = match state {
                FetchState::Start => {
                    if attempts >= self.max_attempts {
                        return Err(match last {
                            LastFailure::Challenge => FetchFailure::ChallengeExhausted { attempts },
                            LastFailure::Timeout => FetchFailure::Timeout { attempts },
                        });
                    }
                    attempts += 1;
                    debug!("{} 第 {}/{} 次尝试", ctx, attempts, self.max_attempts);

                    match session.load_challenge().await {
                        Ok(png) => match self.solver.solve(&png).await {
                            Some(captcha) => FetchState::ChallengeLoaded { captcha },
                            None => {
                                debug!("{} 验证码识别失败，换一张", ctx);
                                last = LastFailure::Challenge;
                                FetchState::Start
                            }
                        },
                        Err(e) => {
                            warn!("{} ⚠️ 加载验证码失败: {}", ctx, e);
                            last = LastFailure::Challenge;
                            FetchState::Start
                        }
                    }
                }

                FetchState::ChallengeLoaded { captcha } => {
                    match session.submit(&ctx.usn, &captcha).await {
                        Ok(None) => FetchState::Submitted,
                        Ok(Some(message)) => match ModalVerdict::classify(&message) {
                            ModalVerdict::InvalidIdentifier => {
                                warn!("{} ⚠️ USN 无效: {}", ctx, truncate_text(message.trim(), 80));
                                return Err(FetchFailure::InvalidIdentifier);
                            }
                            ModalVerdict::WrongCaptcha => {
                                debug!("{} 验证码 {} 被拒绝", ctx, captcha);
                                last = LastFailure::Challenge;
                                FetchState::Start
                            }
                            ModalVerdict::Other => {
                                debug!("{} 未知弹窗: {}", ctx, truncate_text(message.trim(), 80));
                                last = LastFailure::Challenge;
                                FetchState::Start
                            }
                        },
                        Err(e) => {
                            warn!("{} ⚠️ 提交表单失败: {}", ctx, e);
                            last = LastFailure::Challenge;
                            FetchState::Start
                        }
                    }
                }

                FetchState::Submitted => match session.wait_for_results(self.result_wait).await {
                    Ok(Some(html)) => FetchState::Loaded { html },
                    Ok(None) => {
                        debug!("{} 等待结果页超时", ctx);
                        last = LastFailure::Timeout;
                        FetchState::Start
                    }
                    Err(e) => {
                        warn!("{} ⚠️ 等待结果页出错: {}", ctx, e);
                        last = LastFailure::Timeout;
                        FetchState::Start
                    }
                },

                FetchState::Loaded { html } => {
                    let page = self.parser.parse(&html, ctx.kind);
                    if page.rows.is_empty() {
                        warn!("{} ⚠️ 结果页没有成绩行", ctx);
                        return Err(FetchFailure::EmptyResult);
                    }
                    info!(
                        "{} ✓ 第 {} 次尝试成功，解析到 {} 门课程",
                        ctx,
                        attempts,
                        page.rows.len()
                    );
                    return Ok(page);
                }
            };
        }
    }
}
