//! 单个学生的处理流程 - 流程层
//!
//! 流程顺序：
//! 1. 专升本学生请求第 1、2 学期 → 直接跳过
//! 2. ResultFetcher 拿到结果页
//! 3. AttemptReconciler 写入数据库（在阻塞线程池上执行，不占用运行时线程）

use std::sync::Arc;

use tracing::{error, info};

use crate::error::{FetchFailure, StoreError};
use crate::models::{is_lateral_entry, FetchKind};
use crate::services::{AttemptReconciler, ReconcileSummary};
use crate::workflow::result_fetcher::ResultFetcher;
use crate::workflow::student_ctx::StudentCtx;

/// 单个学生的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentOutcome {
    /// 成绩已写入
    Succeeded(ReconcileSummary),
    /// 不需要抓取（专升本学生没有第 1、2 学期），按成功计
    Skipped,
    /// 抓取失败
    Failed(FetchFailure),
}

/// 学生处理流程
///
/// - 不持有任何会话，会话由 ResultFetcher 按学生开关
/// - 数据库不可用时返回错误，由编排层终止整个批次
pub struct StudentFlow {
    fetcher: ResultFetcher,
    reconciler: Arc<AttemptReconciler>,
}

impl StudentFlow {
    pub fn new(fetcher: ResultFetcher, reconciler: AttemptReconciler) -> Self {
        Self {
            fetcher,
            reconciler: Arc::new(reconciler),
        }
    }

    pub async fn run(&self, url: &str, ctx: &StudentCtx) -> Result<StudentOutcome, StoreError> {
        if ctx.kind == FetchKind::Regular
            && matches!(ctx.semester_hint, Some(1) | Some(2))
            && is_lateral_entry(&ctx.usn)
        {
            info!(
                "{} ⏭️ 专升本学生，跳过第 {} 学期",
                ctx,
                ctx.semester_hint.unwrap_or_default()
            );
            return Ok(StudentOutcome::Skipped);
        }

        let page = match self.fetcher.fetch(url, ctx).await {
            Ok(page) => page,
            Err(failure) => {
                error!("{} ❌ {}", ctx, failure);
                return Ok(StudentOutcome::Failed(failure));
            }
        };

        let reconciler = Arc::clone(&self.reconciler);
        let usn = ctx.usn.clone();
        let kind = ctx.kind;
        let summary =
            tokio::task::spawn_blocking(move || reconciler.reconcile_page(&usn, &page, kind))
                .await
                .map_err(|e| StoreError::Join(e.to_string()))??;
        info!(
            "{} ✓ 新增 {} / 未变 {} / 复核 {} / 跳过 {}",
            ctx, summary.inserted, summary.unchanged, summary.revalued, summary.skipped
        );
        Ok(StudentOutcome::Succeeded(summary))
    }
}
