//! 收敛重试控制器 - 编排层
//!
//! 反复对失败集合重新跑一轮，直到：
//! - 失败集合为空；或
//! - 失败数量连续两轮不变（再试也不会好，例如 USN 本身有问题）；或
//! - 达到轮数上限。
//!
//! 门户明确拒绝的 USN（InvalidIdentifier）第一次出现就直接进入最终失败列表，
//! 不参与后续轮次，也不计入收敛判断。

use std::future::Future;

use tracing::info;

use crate::error::{AppResult, FetchFailure};
use crate::orchestrator::batch_processor::RoundResult;
use crate::utils::logging::{log_round_complete, log_round_start};

/// 失败数量连续不变多少轮后停止
const STABLE_ROUNDS: usize = 2;

/// 重试结束后的汇总
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    pub succeeded: Vec<String>,
    /// 最终失败：门户拒绝的 USN 和重试后仍失败的 USN
    pub failed: Vec<(String, FetchFailure)>,
    /// 因取消而从未派发的 USN
    pub not_attempted: Vec<String>,
    pub rounds: usize,
}

/// 收敛重试控制器
#[derive(Debug, Clone)]
pub struct ConvergentRetryController {
    max_rounds: usize,
}

impl ConvergentRetryController {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
        }
    }

    /// 执行重试循环
    ///
    /// # 参数
    /// - `usns`: 初始学生列表
    /// - `round`: 运行一轮的闭包，参数为 (轮次, 本轮学生)
    pub async fn run<F, Fut>(&self, usns: Vec<String>, mut round: F) -> AppResult<RetryOutcome>
    where
        F: FnMut(usize, Vec<String>) -> Fut,
        Fut: Future<Output = AppResult<RoundResult>>,
    {
        let mut outcome = RetryOutcome::default();
        let mut rejected = Vec::new();
        let mut remaining: Vec<(String, FetchFailure)> = Vec::new();
        let mut pending = usns;
        let mut previous = pending.len();
        let mut unchanged = 0;

        while !pending.is_empty() && outcome.rounds < self.max_rounds {
            outcome.rounds += 1;
            log_round_start(outcome.rounds, pending.len());

            let result = round(outcome.rounds, std::mem::take(&mut pending)).await?;
            log_round_complete(outcome.rounds, result.succeeded.len(), result.failed.len());
            outcome.succeeded.extend(result.succeeded);

            let (retryable, terminal): (Vec<_>, Vec<_>) = result
                .failed
                .into_iter()
                .partition(|(_, failure)| failure.is_retryable());
            rejected.extend(terminal);
            remaining = retryable;

            if !result.not_dispatched.is_empty() {
                outcome.not_attempted = result.not_dispatched;
                break;
            }

            let current = remaining.len();
            if current == 0 {
                break;
            }
            if current == previous {
                unchanged += 1;
                if unchanged >= STABLE_ROUNDS {
                    info!(
                        "🛑 失败数量连续 {} 轮保持 {}，停止重试",
                        STABLE_ROUNDS, current
                    );
                    break;
                }
            } else {
                unchanged = 0;
            }
            previous = current;
            pending = remaining.iter().map(|(usn, _)| usn.clone()).collect();
        }

        outcome.failed = rejected;
        outcome.failed.extend(remaining);
        Ok(outcome)
    }
}
