//! 批量抓取编排器 - 编排层
//!
//! ## 职责
//!
//! 给定一组 USN，对每个 USN 独立运行一次 StudentFlow，并汇总每个学生的结果。
//!
//! ## 设计特点
//!
//! - **并发控制**：Semaphore 限制同时打开的浏览器会话数量
//! - **无队头阻塞**：JoinSet 按完成顺序收集结果，慢学生不拖累统计
//! - **会话独占**：每个任务自己打开、关闭会话，任务之间只共享数据库
//! - **取消**：派发前检查 CancelToken；已派发的任务跑完自己的超时
//! - **致命错误**：数据库不可用时取消后续派发，等在途任务结束后返回错误

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::error::{AppError, AppResult, FetchFailure, StoreError};
use crate::models::FetchKind;
use crate::workflow::{StudentCtx, StudentFlow, StudentOutcome};

/// 可克隆的取消标记
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 新批次开始前清除上一次的取消状态
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 一轮抓取的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, FetchFailure)>,
    /// 因取消而没有派发的学生
    pub not_dispatched: Vec<String>,
}

/// 一轮抓取的参数
#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub url: String,
    pub kind: FetchKind,
    pub semester_hint: Option<u8>,
    pub workers: usize,
}

/// 批量抓取编排器
pub struct BatchOrchestrator {
    flow: Arc<StudentFlow>,
    cancel: CancelToken,
}

impl BatchOrchestrator {
    pub fn new(flow: Arc<StudentFlow>, cancel: CancelToken) -> Self {
        Self { flow, cancel }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// 运行一轮
    ///
    /// # 参数
    /// - `usns`: 本轮学生，每个学生在本轮只被一个任务处理
    /// - `plan`: URL、抓取类型、学期提示、并发数
    ///
    /// # 返回
    /// 本轮结果；数据库不可用时返回错误
    pub async fn run_round(&self, usns: &[String], plan: &RoundPlan) -> AppResult<RoundResult> {
        let semaphore = Arc::new(Semaphore::new(plan.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut result = RoundResult::default();
        let total = usns.len();

        for (idx, usn) in usns.iter().enumerate() {
            if self.cancel.is_cancelled() {
                result.not_dispatched.extend(usns[idx..].iter().cloned());
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Other(e.to_string()))?;
            // 等待许可期间可能已被取消
            if self.cancel.is_cancelled() {
                result.not_dispatched.extend(usns[idx..].iter().cloned());
                break;
            }

            let flow = Arc::clone(&self.flow);
            let cancel = self.cancel.clone();
            let url = plan.url.clone();
            let ctx = StudentCtx::new(usn.clone(), idx + 1, total, plan.kind, plan.semester_hint);

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(flow.run(&url, &ctx)).catch_unwind().await;
                let outcome = match outcome {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(store_error)) => {
                        error!("{} ❌ 数据库不可用，取消后续派发: {}", ctx, store_error);
                        cancel.cancel();
                        Err(store_error)
                    }
                    Err(_) => {
                        error!("{} ❌ 任务异常终止", ctx);
                        Ok(StudentOutcome::Failed(FetchFailure::SessionUnavailable(
                            "任务异常终止".to_string(),
                        )))
                    }
                };
                (ctx.usn, outcome)
            });
        }

        if !result.not_dispatched.is_empty() {
            warn!("⚠️ 批次已取消，{} 名学生未派发", result.not_dispatched.len());
        }

        let mut fatal: Option<StoreError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((usn, Ok(outcome))) => match outcome {
                    StudentOutcome::Succeeded(_) | StudentOutcome::Skipped => {
                        result.succeeded.push(usn)
                    }
                    StudentOutcome::Failed(failure) => result.failed.push((usn, failure)),
                },
                Ok((_, Err(store_error))) => {
                    fatal.get_or_insert(store_error);
                }
                Err(e) => error!("任务执行失败: {}", e),
            }
        }

        match fatal {
            Some(store_error) => Err(AppError::Store(store_error)),
            None => Ok(result),
        }
    }
}
