//! 考试次数协调服务
//!
//! 决定一行解析结果如何落到已有的历史记录上：
//!
//! | 已有记录 | 抓取类型 | 分数 | 动作 |
//! |---------|---------|------|------|
//! | 无 | 任意 | - | 插入第 1 次 |
//! | 有 | 任意 | 未变 | 不做任何事 |
//! | 有 | 常规 | 变化 | 插入第 n+1 次 |
//! | 有 | 复核 | 变化 | 原地更新最新一次，次数不变 |
//!
//! 判断和写入在同一个事务中完成。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::infrastructure::store::{
    apply_revaluation, ensure_subject, insert_result, latest_attempt, record_elective_option,
    upsert_student_seen,
};
use crate::infrastructure::ResultStore;
use crate::models::{infer_scheme, FetchKind, Marks, ParsedPage, ParsedRow, ResultRecord};

/// 协调决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// 插入新的考试记录
    Insert { attempt: u32 },
    /// 分数未变，什么都不做
    Unchanged { attempt: u32 },
    /// 复核修正：更新已有记录
    Revalue { attempt: u32, marks: Marks },
}

/// 纯函数：根据最近一次记录决定如何处理新分数
///
/// 复核时内部成绩以数据库为准，总分重新计算为 内部 + 复核外部。
pub fn decide(prior: Option<&ResultRecord>, marks: &Marks, kind: FetchKind) -> Decision {
    let Some(prior) = prior else {
        return Decision::Insert { attempt: 1 };
    };

    match kind {
        FetchKind::Regular => {
            if prior.marks == *marks {
                Decision::Unchanged {
                    attempt: prior.attempt_number,
                }
            } else {
                Decision::Insert {
                    attempt: prior.attempt_number + 1,
                }
            }
        }
        FetchKind::Revaluation => {
            let revised = Marks::new(
                prior.marks.internal,
                marks.external,
                prior.marks.internal + marks.external,
            );
            if revised == prior.marks {
                Decision::Unchanged {
                    attempt: prior.attempt_number,
                }
            } else {
                Decision::Revalue {
                    attempt: prior.attempt_number,
                    marks: revised,
                }
            }
        }
    }
}

/// 一个结果页的协调统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub unchanged: usize,
    pub revalued: usize,
    /// 写入失败被跳过的行
    pub skipped: usize,
}

/// 考试次数协调器
pub struct AttemptReconciler {
    store: Arc<ResultStore>,
}

impl AttemptReconciler {
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }

    /// 协调整页结果
    ///
    /// 单行失败只记警告并跳过；数据库不可用时立即返回错误。
    pub fn reconcile_page(
        &self,
        requested_usn: &str,
        page: &ParsedPage,
        kind: FetchKind,
    ) -> Result<ReconcileSummary, StoreError> {
        let usn = page
            .student_usn
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(requested_usn);
        if !usn.eq_ignore_ascii_case(requested_usn) {
            warn!("[学生 {}] 结果页显示的 USN 为 {}", requested_usn, usn);
        }

        let mut summary = ReconcileSummary::default();
        for row in &page.rows {
            match self.reconcile_row(usn, page.student_name.as_deref(), row, kind) {
                Ok(Decision::Insert { .. }) => summary.inserted += 1,
                Ok(Decision::Unchanged { .. }) => summary.unchanged += 1,
                Ok(Decision::Revalue { .. }) => summary.revalued += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("[学生 {}] ⚠️ 跳过 {}: {}", usn, row.subject_code, e);
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    /// 协调单行结果（一个事务）
    pub fn reconcile_row(
        &self,
        usn: &str,
        student_name: Option<&str>,
        row: &ParsedRow,
        kind: FetchKind,
    ) -> Result<Decision, StoreError> {
        let key = format!("{}/{}/{}", usn, row.subject_code, row.semester);
        let classify = |e: rusqlite::Error| StoreError::classify(key.clone(), e);

        self.store.with_transaction(|tx| {
            upsert_student_seen(tx, usn, student_name).map_err(classify)?;

            let scheme = infer_scheme(&row.subject_code);
            let credits = row.elective.as_ref().map(|e| e.credits);
            ensure_subject(
                tx,
                &row.subject_code,
                &row.subject_name,
                row.semester,
                credits,
                &scheme,
            )
            .map_err(classify)?;

            if let Some(elective) = &row.elective {
                record_elective_option(
                    tx,
                    &row.subject_code,
                    &row.subject_name,
                    row.semester,
                    elective.credits,
                    &elective.placeholder_code,
                    &scheme,
                )
                .map_err(classify)?;
            }

            let prior =
                latest_attempt(tx, usn, &row.subject_code, row.semester).map_err(classify)?;

            if kind == FetchKind::Revaluation {
                match &prior {
                    None => warn!(
                        "[学生 {}] ⚠️ {} 没有原始成绩，复核结果作为第 1 次记录",
                        usn, row.subject_code
                    ),
                    Some(prior) if prior.marks.internal != row.marks.internal => warn!(
                        "[学生 {}] ⚠️ {} 复核页内部成绩 {} 与记录 {} 不一致，保留原记录",
                        usn, row.subject_code, row.marks.internal, prior.marks.internal
                    ),
                    Some(_) => {}
                }
            }

            let decision = decide(prior.as_ref(), &row.marks, kind);
            let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();

            match &decision {
                Decision::Insert { attempt } => {
                    let record = ResultRecord {
                        student_usn: usn.to_string(),
                        subject_code: row.subject_code.clone(),
                        semester: row.semester,
                        attempt_number: *attempt,
                        marks: row.marks,
                        letter_grade: None,
                        grade_points: None,
                        result_status: row.result_status.clone(),
                        is_elective: row.is_elective(),
                        scraped_at: now,
                    };
                    insert_result(tx, &record).map_err(classify)?;
                    if *attempt > 1 {
                        info!(
                            "[学生 {}] 📝 {} 第 {} 次考试: {} 分",
                            usn, row.subject_code, attempt, row.marks.total
                        );
                    }
                }
                Decision::Unchanged { attempt } => {
                    debug!(
                        "[学生 {}] {} 第 {} 次成绩未变",
                        usn, row.subject_code, attempt
                    );
                }
                Decision::Revalue { attempt, marks } => {
                    let record = ResultRecord {
                        student_usn: usn.to_string(),
                        subject_code: row.subject_code.clone(),
                        semester: row.semester,
                        attempt_number: *attempt,
                        marks: *marks,
                        letter_grade: None,
                        grade_points: None,
                        result_status: row.result_status.clone(),
                        is_elective: row.is_elective(),
                        scraped_at: now,
                    };
                    apply_revaluation(tx, &record).map_err(classify)?;
                    info!(
                        "[学生 {}] 🔁 {} 复核: 外部 {} → {}，总分 {}",
                        usn,
                        row.subject_code,
                        prior.as_ref().map(|p| p.marks.external).unwrap_or_default(),
                        marks.external,
                        marks.total
                    );
                }
            }

            Ok(decision)
        })
    }
}
