//! 成绩服务入口 - 编排层
//!
//! 对外只暴露三个操作：
//! - `scrape_batch`：常规成绩批量抓取
//! - `scrape_revaluation_batch`：复核成绩批量抓取
//! - `recompute_grades`：重算某学期成绩
//!
//! CLI、HTTP 或其他外壳都只调用这三个方法。

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, FetchFailure, StoreError};
use crate::infrastructure::{OcrEngine, ResultStore, SessionFactory};
use crate::models::{default_mappings, ElectiveTable, FetchKind};
use crate::orchestrator::batch_processor::{BatchOrchestrator, CancelToken, RoundPlan};
use crate::orchestrator::retry_controller::ConvergentRetryController;
use crate::services::{
    AttemptReconciler, CaptchaSolver, GradeEngine, GradeReport, PassPolicy, ResultParser,
};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::{ResultFetcher, StudentFlow};

/// 批次结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchStatus {
    /// 全部成功
    Complete,
    /// 部分成功，存在最终失败的学生
    Partial,
}

/// 最终失败的学生
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStudent {
    pub usn: String,
    pub reason: String,
    /// 门户明确拒绝的 USN 为 false
    pub retryable: bool,
}

impl FailedStudent {
    fn new(usn: String, failure: &FetchFailure) -> Self {
        Self {
            usn,
            reason: failure.to_string(),
            retryable: failure.is_retryable(),
        }
    }
}

/// 批量抓取报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub kind: FetchKind,
    pub succeeded: usize,
    pub failed: Vec<FailedStudent>,
    /// 因取消而没有处理的学生
    pub not_attempted: Vec<String>,
    pub elapsed_seconds: f64,
    pub rounds: usize,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        if self.failed.is_empty() && self.not_attempted.is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len() + self.not_attempted.len()
    }
}

/// 成绩服务
pub struct ResultsService {
    config: Config,
    store: Arc<ResultStore>,
    orchestrator: BatchOrchestrator,
    retry: ConvergentRetryController,
    grades: Arc<GradeEngine>,
}

impl ResultsService {
    /// 组装服务
    ///
    /// 选修课规则优先使用数据库中导入的规则，没有导入时使用内置的 2021 学制规则。
    pub fn new(
        config: Config,
        store: Arc<ResultStore>,
        sessions: Arc<dyn SessionFactory>,
        ocr: Arc<dyn OcrEngine>,
    ) -> AppResult<Self> {
        let mut mappings = store.elective_mappings()?;
        if mappings.is_empty() {
            mappings = default_mappings();
        }
        let electives = Arc::new(ElectiveTable::new(mappings)?);
        info!("✓ 已加载 {} 条选修课规则", electives.len());

        let parser = Arc::new(
            ResultParser::new(electives).map_err(|e| AppError::Other(e.to_string()))?,
        );
        let solver = Arc::new(CaptchaSolver::new(ocr, config.captcha_min_len));
        let fetcher = ResultFetcher::new(sessions, solver, parser, &config);
        let reconciler = AttemptReconciler::new(Arc::clone(&store));
        let flow = Arc::new(StudentFlow::new(fetcher, reconciler));

        Ok(Self {
            orchestrator: BatchOrchestrator::new(flow, CancelToken::new()),
            retry: ConvergentRetryController::new(config.max_retry_rounds),
            grades: Arc::new(GradeEngine::new(
                Arc::clone(&store),
                PassPolicy::from_config(&config),
            )),
            store,
            config,
        })
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    /// 用于从外部取消正在运行的批次
    pub fn cancel_token(&self) -> CancelToken {
        self.orchestrator.cancel_token()
    }

    /// 常规成绩批量抓取
    ///
    /// # 参数
    /// - `url`: 成绩查询页面
    /// - `usns`: 学生列表（会去重、转大写）
    /// - `semester_hint`: 期望学期，只用于跳过专升本学生的第 1、2 学期
    /// - `workers`: 并发会话数
    pub async fn scrape_batch(
        &self,
        url: &str,
        usns: &[String],
        semester_hint: Option<u8>,
        workers: usize,
    ) -> AppResult<BatchReport> {
        let plan = RoundPlan {
            url: url.to_string(),
            kind: FetchKind::Regular,
            semester_hint,
            workers,
        };
        self.run_batch(usns, plan).await
    }

    /// 复核成绩批量抓取
    pub async fn scrape_revaluation_batch(
        &self,
        url: &str,
        usns: &[String],
        workers: usize,
    ) -> AppResult<BatchReport> {
        let plan = RoundPlan {
            url: url.to_string(),
            kind: FetchKind::Revaluation,
            semester_hint: None,
            workers,
        };
        self.run_batch(usns, plan).await
    }

    /// 重算某学期成绩
    ///
    /// 整学期的事务在阻塞线程池上执行，同时进行的抓取任务不会被占住运行时线程。
    pub async fn recompute_grades(&self, semester: u8) -> AppResult<GradeReport> {
        let grades = Arc::clone(&self.grades);
        tokio::task::spawn_blocking(move || grades.recompute(semester))
            .await
            .map_err(|e| AppError::Store(StoreError::Join(e.to_string())))?
    }

    async fn run_batch(&self, usns: &[String], plan: RoundPlan) -> AppResult<BatchReport> {
        let usns = normalize_usns(usns);
        let label = match plan.kind {
            FetchKind::Regular => "常规",
            FetchKind::Revaluation => "复核",
        };
        log_startup(label, usns.len(), plan.workers);

        let cancel = self.orchestrator.cancel_token();
        cancel.reset();
        let started = Instant::now();

        let orchestrator = &self.orchestrator;
        let round_plan = &plan;
        let outcome = self
            .retry
            .run(usns, move |_, pending| async move {
                orchestrator.run_round(&pending, round_plan).await
            })
            .await?;

        let report = BatchReport {
            kind: plan.kind,
            succeeded: outcome.succeeded.len(),
            failed: outcome
                .failed
                .into_iter()
                .map(|(usn, failure)| FailedStudent::new(usn, &failure))
                .collect(),
            not_attempted: outcome.not_attempted,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            rounds: outcome.rounds,
        };

        print_final_stats(
            report.succeeded,
            report.failed.len(),
            report.total(),
            report.elapsed_seconds,
        );
        self.append_failures(&report);
        Ok(report)
    }

    /// 把最终失败列表追加到运行日志文件
    fn append_failures(&self, report: &BatchReport) {
        if report.failed.is_empty() {
            return;
        }
        let mut lines = String::new();
        lines.push_str(&format!(
            "\n[{}] 最终失败 {} 名学生:\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            report.failed.len()
        ));
        for failed in &report.failed {
            lines.push_str(&format!("  {} - {}\n", failed.usn, failed.reason));
        }

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.output_log_file)
            .and_then(|mut file| file.write_all(lines.as_bytes()));
        if let Err(e) = written {
            warn!("写入日志文件失败 {}: {}", self.config.output_log_file, e);
        }
    }
}

/// 去掉空白、转大写、按首次出现顺序去重
pub fn normalize_usns(usns: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    usns.iter()
        .map(|usn| usn.trim().to_uppercase())
        .filter(|usn| !usn.is_empty())
        .filter(|usn| seen.insert(usn.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usns_are_normalized() {
        let input = vec![
            " 1bi21is001 ".to_string(),
            "1BI21IS002".to_string(),
            "1BI21IS001".to_string(),
            "".to_string(),
        ];
        assert_eq!(normalize_usns(&input), vec!["1BI21IS001", "1BI21IS002"]);
    }

    #[test]
    fn status_reflects_failures() {
        let mut report = BatchReport {
            kind: FetchKind::Regular,
            succeeded: 2,
            failed: Vec::new(),
            not_attempted: Vec::new(),
            elapsed_seconds: 1.0,
            rounds: 1,
        };
        assert_eq!(report.status(), BatchStatus::Complete);
        report.failed.push(FailedStudent::new(
            "1BI21IS003".to_string(),
            &FetchFailure::InvalidIdentifier,
        ));
        assert_eq!(report.status(), BatchStatus::Partial);
        assert!(!report.failed[0].retryable);
        assert_eq!(report.total(), 3);
    }
}
