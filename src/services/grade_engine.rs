//! 成绩计算服务
//!
//! 只通过 `latest_results` 视图读取每门课程最新一次的考试记录，
//! 整学期的等级、SGPA、学期汇总和 CGPA 在一个事务里全部重算。
//! 同样的记录集合无论重算多少次，结果都完全相同。

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, GradeError, StoreError};
use crate::infrastructure::ResultStore;
use crate::models::{max_marks_for, round2, ClassGrade, LetterGrade, Marks, SemesterSummary};

/// 及格线
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassPolicy {
    /// 有期末考试的课程，外部成绩的最低分
    pub min_external: u32,
    /// 总分（或仅内部考核课程的内部成绩）占满分的最低百分比
    pub min_percent: f64,
}

impl Default for PassPolicy {
    fn default() -> Self {
        Self {
            min_external: 18,
            min_percent: 40.0,
        }
    }
}

impl PassPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_external: config.pass_min_external,
            min_percent: config.pass_min_percent,
        }
    }

    /// 是否及格
    ///
    /// # 参数
    /// - `marks`: 最新一次考试的分数
    /// - `max_marks`: 课程满分
    /// - `external_bearing`: 课程是否有期末考试
    pub fn passes(&self, marks: &Marks, max_marks: u32, external_bearing: bool) -> bool {
        let threshold = max_marks as f64 * self.min_percent / 100.0;
        if external_bearing {
            marks.external >= self.min_external && marks.total as f64 >= threshold
        } else {
            marks.internal as f64 >= threshold
        }
    }
}

/// 单门课程的评定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectGrade {
    pub letter: LetterGrade,
    pub points: u32,
    pub passed: bool,
}

impl SubjectGrade {
    /// 写回 results.result_status 的及格标记
    pub fn status(&self) -> &'static str {
        if self.passed {
            "P"
        } else {
            "F"
        }
    }
}

/// 评定单门课程：按百分比定等级，不及格时强制为 F
pub fn grade_subject(
    marks: &Marks,
    max_marks: u32,
    external_bearing: bool,
    policy: &PassPolicy,
) -> SubjectGrade {
    let passed = policy.passes(marks, max_marks, external_bearing);
    let letter = if passed {
        let percentage = if max_marks == 0 {
            0.0
        } else {
            marks.total as f64 * 100.0 / max_marks as f64
        };
        LetterGrade::from_percentage(percentage)
    } else {
        LetterGrade::F
    };
    SubjectGrade {
        letter,
        points: letter.points(),
        passed,
    }
}

/// SGPA = Σ(绩点 × 学分) / Σ(学分)，保留两位小数
///
/// 输入为 (学分, 绩点)，学分为 0 时返回 None。
pub fn compute_sgpa(items: &[(u32, u32)]) -> Option<f64> {
    let credits: u32 = items.iter().map(|(c, _)| c).sum();
    if credits == 0 {
        return None;
    }
    let weighted: u32 = items.iter().map(|(c, p)| c * p).sum();
    Some(round2(weighted as f64 / credits as f64))
}

/// CGPA = 各学期 SGPA 的算术平均，保留两位小数
pub fn compute_cgpa(sgpas: &[f64]) -> Option<f64> {
    if sgpas.is_empty() {
        return None;
    }
    Some(round2(sgpas.iter().sum::<f64>() / sgpas.len() as f64))
}

/// 被跳过的项目及原因
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub student_usn: String,
    pub subject_code: Option<String>,
    pub reason: String,
}

/// 一次重算的报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub semester: u8,
    pub students_processed: usize,
    pub average_sgpa: Option<f64>,
    pub highest_sgpa: Option<f64>,
    pub lowest_sgpa: Option<f64>,
    pub backlog_students: usize,
    pub class_distribution: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedItem>,
}

/// 从视图中读出的一行
struct LatestRow {
    student_usn: String,
    subject_code: String,
    attempt_number: u32,
    marks: Marks,
    subject_name: String,
    credits: Option<u32>,
    external_bearing: bool,
}

/// 成绩计算引擎
pub struct GradeEngine {
    store: Arc<ResultStore>,
    policy: PassPolicy,
    running: Mutex<HashSet<u8>>,
}

/// 学期占用标记，离开作用域时自动释放
struct SemesterGuard<'a> {
    running: &'a Mutex<HashSet<u8>>,
    semester: u8,
}

impl Drop for SemesterGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.semester);
        }
    }
}

impl GradeEngine {
    pub fn new(store: Arc<ResultStore>, policy: PassPolicy) -> Self {
        Self {
            store,
            policy,
            running: Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, semester: u8) -> AppResult<SemesterGuard<'_>> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| AppError::Other("成绩计算状态锁已损坏".to_string()))?;
        if !running.insert(semester) {
            return Err(GradeError::AlreadyRunning(semester).into());
        }
        Ok(SemesterGuard {
            running: &self.running,
            semester,
        })
    }

    /// 重新计算某学期所有学生的成绩
    ///
    /// # 参数
    /// - `semester`: 学期（1-8）
    ///
    /// # 返回
    /// 重算报告；同一学期的重算正在进行时返回 `GradeError::AlreadyRunning`
    pub fn recompute(&self, semester: u8) -> AppResult<GradeReport> {
        if !(1..=8).contains(&semester) {
            return Err(GradeError::InvalidSemester(semester).into());
        }
        let _guard = self.acquire(semester)?;

        info!("{}", "=".repeat(60));
        info!("🧮 重新计算第 {} 学期成绩", semester);
        info!("{}", "=".repeat(60));

        let policy = self.policy;
        let report = self.store.with_transaction(|tx| {
            let rows = load_latest(tx, semester)?;
            let mut skipped = Vec::new();
            let mut per_student: BTreeMap<String, Vec<(LatestRow, SubjectGrade)>> =
                BTreeMap::new();

            for row in rows {
                let max_marks = max_marks_for(&row.subject_name, semester);
                let grade = grade_subject(&row.marks, max_marks, row.external_bearing, &policy);
                tx.execute(
                    "UPDATE results SET letter_grade = ?1, grade_points = ?2, result_status = ?3
                     WHERE student_usn = ?4 AND subject_code = ?5 AND semester = ?6 AND attempt_number = ?7",
                    params![
                        grade.letter.as_str(),
                        grade.points,
                        grade.status(),
                        row.student_usn,
                        row.subject_code,
                        semester,
                        row.attempt_number
                    ],
                )?;
                per_student
                    .entry(row.student_usn.clone())
                    .or_default()
                    .push((row, grade));
            }

            tx.execute(
                "DELETE FROM semester_summaries WHERE semester = ?1",
                [semester],
            )?;

            let now = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
            let mut summaries = Vec::new();
            for (usn, subjects) in &per_student {
                match summarize(usn, semester, subjects, &mut skipped) {
                    Some(summary) => {
                        save_summary(tx, &summary, &now)?;
                        summaries.push(summary);
                    }
                    None => skipped.push(SkippedItem {
                        student_usn: usn.clone(),
                        subject_code: None,
                        reason: "没有可计算学分的课程".to_string(),
                    }),
                }
            }

            refresh_cgpa(tx)?;

            Ok(build_report(semester, &summaries, skipped))
        })?;

        info!(
            "✅ 第 {} 学期: {} 名学生, 平均 SGPA {:?}, 挂科 {} 人",
            semester, report.students_processed, report.average_sgpa, report.backlog_students
        );
        if !report.skipped.is_empty() {
            warn!("⚠️ 跳过 {} 项，详见报告", report.skipped.len());
        }
        Ok(report)
    }
}

fn load_latest(conn: &Connection, semester: u8) -> Result<Vec<LatestRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT lr.student_usn, lr.subject_code, lr.attempt_number,
                lr.internal_marks, lr.external_marks, lr.total_marks,
                s.subject_name, s.credits,
                EXISTS(SELECT 1 FROM latest_results b
                       WHERE b.subject_code = lr.subject_code AND b.external_marks > 0)
         FROM latest_results lr
         JOIN subjects s ON s.subject_code = lr.subject_code
         WHERE lr.semester = ?1
         ORDER BY lr.student_usn, lr.subject_code",
    )?;
    let rows = stmt.query_map([semester], |row| {
        Ok(LatestRow {
            student_usn: row.get(0)?,
            subject_code: row.get(1)?,
            attempt_number: row.get(2)?,
            marks: Marks::new(row.get(3)?, row.get(4)?, row.get(5)?),
            subject_name: row.get(6)?,
            credits: row.get(7)?,
            external_bearing: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// 汇总一个学生的学期成绩
///
/// 学分未知的课程既不参与 SGPA，也不计入挂科数。
fn summarize(
    usn: &str,
    semester: u8,
    subjects: &[(LatestRow, SubjectGrade)],
    skipped: &mut Vec<SkippedItem>,
) -> Option<SemesterSummary> {
    let mut weighted = Vec::new();
    let mut obtained = 0;
    let mut maximum = 0;
    let mut backlog_count = 0;

    for (row, grade) in subjects {
        match row.credits {
            Some(credits) if credits > 0 => {
                weighted.push((credits, grade.points));
                if !grade.passed {
                    backlog_count += 1;
                }
                obtained += row.marks.total;
                maximum += max_marks_for(&row.subject_name, semester);
            }
            _ => {
                warn!("[学生 {}] ⚠️ {} 学分未知，不计入 SGPA", usn, row.subject_code);
                skipped.push(SkippedItem {
                    student_usn: usn.to_string(),
                    subject_code: Some(row.subject_code.clone()),
                    reason: "学分未知".to_string(),
                });
            }
        }
    }

    let sgpa = compute_sgpa(&weighted)?;
    let has_backlogs = backlog_count > 0;
    let percentage = if maximum == 0 {
        0.0
    } else {
        round2(obtained as f64 * 100.0 / maximum as f64)
    };

    Some(SemesterSummary {
        student_usn: usn.to_string(),
        semester,
        sgpa,
        total_marks_obtained: obtained,
        total_marks_maximum: maximum,
        percentage,
        total_credits: weighted.iter().map(|(c, _)| c).sum(),
        class_grade: ClassGrade::from_sgpa(sgpa, has_backlogs),
        has_backlogs,
        backlog_count,
    })
}

fn save_summary(conn: &Connection, summary: &SemesterSummary, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO semester_summaries(student_usn, semester, sgpa, total_marks_obtained,
                                        total_marks_maximum, percentage, total_credits, class_grade,
                                        has_backlogs, backlog_count, calculated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            summary.student_usn,
            summary.semester,
            summary.sgpa,
            summary.total_marks_obtained,
            summary.total_marks_maximum,
            summary.percentage,
            summary.total_credits,
            summary.class_grade.as_str(),
            summary.has_backlogs,
            summary.backlog_count,
            now
        ],
    )?;
    Ok(())
}

/// 用所有学期汇总刷新每个学生的 CGPA
///
/// 已经没有任何学期汇总的学生，CGPA 清空。
fn refresh_cgpa(conn: &Connection) -> Result<(), StoreError> {
    let cleared = conn.execute(
        "UPDATE students SET cgpa = NULL
         WHERE cgpa IS NOT NULL
           AND usn NOT IN (SELECT student_usn FROM semester_summaries)",
        [],
    )?;
    if cleared > 0 {
        debug!("{} 名学生已无学期汇总，CGPA 清空", cleared);
    }

    let mut stmt = conn.prepare(
        "SELECT student_usn, sgpa FROM semester_summaries ORDER BY student_usn, semester",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;

    let mut by_student: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        let (usn, sgpa) = row?;
        by_student.entry(usn).or_default().push(sgpa);
    }

    for (usn, sgpas) in by_student {
        if let Some(cgpa) = compute_cgpa(&sgpas) {
            conn.execute(
                "UPDATE students SET cgpa = ?1 WHERE usn = ?2",
                params![cgpa, usn],
            )?;
        }
    }
    Ok(())
}

fn build_report(semester: u8, summaries: &[SemesterSummary], skipped: Vec<SkippedItem>) -> GradeReport {
    let sgpas: Vec<f64> = summaries.iter().map(|s| s.sgpa).collect();
    let mut class_distribution = BTreeMap::new();
    for summary in summaries {
        *class_distribution
            .entry(summary.class_grade.as_str().to_string())
            .or_insert(0) += 1;
    }

    GradeReport {
        semester,
        students_processed: summaries.len(),
        average_sgpa: compute_cgpa(&sgpas),
        highest_sgpa: sgpas.iter().copied().reduce(f64::max),
        lowest_sgpa: sgpas.iter().copied().reduce(f64::min),
        backlog_students: summaries.iter().filter(|s| s.has_backlogs).count(),
        class_distribution,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::store::{insert_result, upsert_student_seen};
    use crate::models::{ReferenceData, ResultRecord, Subject};

    #[test]
    fn sgpa_weights_points_by_credits() {
        assert_eq!(compute_sgpa(&[(4, 8), (4, 6), (3, 10), (1, 4)]), Some(7.5));
        assert_eq!(compute_sgpa(&[]), None);
    }

    #[test]
    fn cgpa_is_mean_of_sgpas() {
        assert_eq!(compute_cgpa(&[7.5, 8.0, 6.2]), Some(7.23));
        assert_eq!(compute_cgpa(&[]), None);
    }

    #[test]
    fn failing_external_forces_f() {
        let policy = PassPolicy::default();
        // 总分够 90%，但外部成绩不足 18
        let grade = grade_subject(&Marks::new(50, 15, 90), 100, true, &policy);
        assert!(!grade.passed);
        assert_eq!(grade.letter, LetterGrade::F);
        assert_eq!(grade.points, 0);
    }

    #[test]
    fn internal_only_subject_uses_internal() {
        let policy = PassPolicy::default();
        let grade = grade_subject(&Marks::new(85, 0, 85), 100, false, &policy);
        assert!(grade.passed);
        assert_eq!(grade.letter, LetterGrade::APlus);

        let failed = grade_subject(&Marks::new(30, 0, 30), 100, false, &policy);
        assert_eq!(failed.letter, LetterGrade::F);
    }

    #[test]
    fn project_band_uses_larger_maximum() {
        let policy = PassPolicy::default();
        let grade = grade_subject(&Marks::new(90, 90, 180), 200, true, &policy);
        assert_eq!(grade.letter, LetterGrade::O);
        let grade = grade_subject(&Marks::new(60, 40, 100), 200, true, &policy);
        assert_eq!(grade.letter, LetterGrade::B);
    }

    #[test]
    fn pass_policy_is_configurable() {
        let strict = PassPolicy {
            min_external: 25,
            min_percent: 50.0,
        };
        assert!(!strict.passes(&Marks::new(30, 20, 50), 100, true));
        assert!(PassPolicy::default().passes(&Marks::new(30, 20, 50), 100, true));
    }

    #[test]
    fn overlapping_recompute_is_rejected() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        let engine = GradeEngine::new(store, PassPolicy::default());

        let guard = engine.acquire(4).unwrap();
        assert!(matches!(
            engine.recompute(4),
            Err(AppError::Grade(GradeError::AlreadyRunning(4)))
        ));
        // 其他学期不受影响
        assert!(engine.recompute(5).is_ok());
        drop(guard);
        assert!(engine.recompute(4).is_ok());
    }

    const USN: &str = "1BI21IS001";

    fn import_subject(store: &ResultStore, code: &str, credits: Option<u32>) {
        store
            .import_reference(&ReferenceData {
                subjects: vec![Subject {
                    subject_code: code.to_string(),
                    subject_name: format!("Subject {}", code),
                    semester: 4,
                    credits,
                    scheme: "21".to_string(),
                    is_placeholder: false,
                }],
                ..Default::default()
            })
            .unwrap();
    }

    fn seed_result(store: &ResultStore, code: &str, marks: Marks, status: &str) {
        let record = ResultRecord {
            student_usn: USN.to_string(),
            subject_code: code.to_string(),
            semester: 4,
            attempt_number: 1,
            marks,
            letter_grade: None,
            grade_points: None,
            result_status: status.to_string(),
            is_elective: false,
            scraped_at: "2024-01-01T00:00:00".to_string(),
        };
        store
            .with_transaction(|tx| {
                upsert_student_seen(tx, USN, Some("ASHA K"))?;
                insert_result(tx, &record)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cgpa_cleared_when_last_summary_disappears() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        import_subject(&store, "21CS42", Some(4));
        seed_result(&store, "21CS42", Marks::new(50, 45, 95), "P");
        let engine = GradeEngine::new(store.clone(), PassPolicy::default());

        engine.recompute(4).unwrap();
        assert_eq!(store.student_cgpa(USN).unwrap(), Some(10.0));

        // 学分改为未知后，该学生不再有任何学期汇总
        import_subject(&store, "21CS42", None);
        let report = engine.recompute(4).unwrap();
        assert_eq!(report.students_processed, 0);
        assert!(store.semester_summary(USN, 4).unwrap().is_none());
        assert_eq!(store.student_cgpa(USN).unwrap(), None);
    }

    #[test]
    fn recompute_writes_back_pass_status() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        import_subject(&store, "21CS42", Some(4));
        // 门户显示 P，但外部成绩低于及格线
        seed_result(&store, "21CS42", Marks::new(50, 12, 62), "P");
        let engine = GradeEngine::new(store.clone(), PassPolicy::default());

        engine.recompute(4).unwrap();
        let stored = store.attempts(USN, "21CS42", 4).unwrap();
        assert_eq!(stored[0].result_status, "F");
        assert_eq!(stored[0].letter_grade.as_deref(), Some("F"));
        assert_eq!(stored[0].grade_points, Some(0));
    }

    #[test]
    fn unknown_credit_failures_are_not_backlogs() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        import_subject(&store, "21CS42", Some(4));
        import_subject(&store, "21CS49", None);
        seed_result(&store, "21CS42", Marks::new(40, 35, 75), "P");
        seed_result(&store, "21CS49", Marks::new(10, 5, 15), "F");
        let engine = GradeEngine::new(store.clone(), PassPolicy::default());

        let report = engine.recompute(4).unwrap();
        let summary = store.semester_summary(USN, 4).unwrap().unwrap();
        assert_eq!(summary.backlog_count, 0);
        assert!(!summary.has_backlogs);
        assert_eq!(summary.class_grade, ClassGrade::FirstClassDistinction);
        assert_eq!(report.backlog_students, 0);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.subject_code.as_deref() == Some("21CS49")));
        // 未计入汇总的课程仍然写回了等级
        let failed = store.attempts(USN, "21CS49", 4).unwrap();
        assert_eq!(failed[0].letter_grade.as_deref(), Some("F"));
    }

    #[test]
    fn invalid_semester_is_rejected() {
        let store = Arc::new(ResultStore::open_in_memory().unwrap());
        let engine = GradeEngine::new(store, PassPolicy::default());
        assert!(matches!(
            engine.recompute(9),
            Err(AppError::Grade(GradeError::InvalidSemester(9)))
        ));
    }
}
