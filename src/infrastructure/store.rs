//! 成绩数据库 - 基础设施层
//!
//! 持有唯一的 SQLite 连接，是所有 worker 之间唯一的同步点。
//! 每次对数据库的访问都在互斥锁内完成，需要原子性的操作放在同一个事务里。

use crate::error::StoreError;
use crate::models::{ElectiveMapping, Marks, ReferenceData, ResultRecord, SemesterSummary};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students(
    usn TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    scheme TEXT,
    batch TEXT,
    discipline TEXT,
    cgpa REAL
);
CREATE TABLE IF NOT EXISTS subjects(
    subject_code TEXT PRIMARY KEY,
    subject_name TEXT NOT NULL,
    semester INTEGER NOT NULL,
    credits INTEGER,
    scheme TEXT NOT NULL,
    is_placeholder INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS elective_mappings(
    position INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    placeholder_code TEXT NOT NULL,
    semester INTEGER NOT NULL,
    credits INTEGER NOT NULL,
    course_label TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS elective_subjects(
    subject_code TEXT PRIMARY KEY,
    subject_name TEXT NOT NULL,
    semester INTEGER NOT NULL,
    credits INTEGER NOT NULL,
    placeholder_code TEXT NOT NULL,
    scheme TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_elective_subjects_placeholder ON elective_subjects(placeholder_code);
CREATE TABLE IF NOT EXISTS results(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_usn TEXT NOT NULL,
    subject_code TEXT NOT NULL,
    semester INTEGER NOT NULL,
    attempt_number INTEGER NOT NULL,
    internal_marks INTEGER NOT NULL,
    external_marks INTEGER NOT NULL,
    total_marks INTEGER NOT NULL,
    letter_grade TEXT,
    grade_points INTEGER,
    result_status TEXT NOT NULL,
    is_elective INTEGER NOT NULL DEFAULT 0,
    scraped_at TEXT NOT NULL,
    UNIQUE(student_usn, subject_code, semester, attempt_number),
    FOREIGN KEY(subject_code) REFERENCES subjects(subject_code)
);
CREATE INDEX IF NOT EXISTS idx_results_semester ON results(semester);
CREATE INDEX IF NOT EXISTS idx_results_key ON results(student_usn, subject_code, semester);
CREATE TABLE IF NOT EXISTS semester_summaries(
    student_usn TEXT NOT NULL,
    semester INTEGER NOT NULL,
    sgpa REAL NOT NULL,
    total_marks_obtained INTEGER NOT NULL,
    total_marks_maximum INTEGER NOT NULL,
    percentage REAL NOT NULL,
    total_credits INTEGER NOT NULL,
    class_grade TEXT NOT NULL,
    has_backlogs INTEGER NOT NULL,
    backlog_count INTEGER NOT NULL,
    calculated_at TEXT NOT NULL,
    PRIMARY KEY(student_usn, semester)
);
CREATE VIEW IF NOT EXISTS latest_results AS
    SELECT r.* FROM results r
    WHERE r.attempt_number = (
        SELECT MAX(x.attempt_number) FROM results x
        WHERE x.student_usn = r.student_usn
          AND x.subject_code = r.subject_code
          AND x.semester = r.semester
    );
";

/// 参考数据导入统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub students: usize,
    pub subjects: usize,
    pub electives: usize,
}

/// 成绩数据库
pub struct ResultStore {
    conn: Mutex<Connection>,
}

impl ResultStore {
    /// 打开（必要时创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        info!("✓ 数据库已打开: {}", path.display());
        Self::from_connection(conn)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// 在持有连接锁的情况下执行操作
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("数据库连接锁已损坏".to_string()))?;
        f(&mut guard)
    }

    /// 在单个事务中执行操作，闭包返回错误时整体回滚
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::classify("BEGIN", e))?;
            let value = f(&tx)?;
            tx.commit().map_err(|e| StoreError::classify("COMMIT", e))?;
            Ok(value)
        })
    }

    // ========== 参考数据 ==========

    /// 导入学生、课程和选修课规则
    ///
    /// 选修课规则只要出现就整表替换，以保证顺序与导入文件一致。
    pub fn import_reference(&self, data: &ReferenceData) -> Result<ImportStats, StoreError> {
        self.with_transaction(|tx| {
            let mut stats = ImportStats::default();

            for student in &data.students {
                tx.execute(
                    "INSERT INTO students(usn, name, scheme, batch, discipline)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(usn) DO UPDATE SET
                        name = excluded.name,
                        scheme = excluded.scheme,
                        batch = excluded.batch,
                        discipline = excluded.discipline",
                    params![
                        student.usn,
                        student.name,
                        student.scheme,
                        student.batch,
                        student.discipline
                    ],
                )?;
                stats.students += 1;
            }

            for subject in &data.subjects {
                tx.execute(
                    "INSERT INTO subjects(subject_code, subject_name, semester, credits, scheme, is_placeholder)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(subject_code) DO UPDATE SET
                        subject_name = excluded.subject_name,
                        semester = excluded.semester,
                        credits = excluded.credits,
                        scheme = excluded.scheme,
                        is_placeholder = excluded.is_placeholder",
                    params![
                        subject.subject_code,
                        subject.subject_name,
                        subject.semester,
                        subject.credits,
                        subject.scheme,
                        subject.is_placeholder
                    ],
                )?;
                stats.subjects += 1;
            }

            if !data.electives.is_empty() {
                tx.execute("DELETE FROM elective_mappings", [])?;
                for (position, mapping) in data.electives.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO elective_mappings(position, pattern, placeholder_code, semester, credits, course_label)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            position as i64,
                            mapping.pattern,
                            mapping.placeholder_code,
                            mapping.semester,
                            mapping.credits,
                            mapping.course_label
                        ],
                    )?;
                    stats.electives += 1;
                }
            }

            Ok(stats)
        })
    }

    /// 按优先级顺序读取选修课规则
    pub fn elective_mappings(&self) -> Result<Vec<ElectiveMapping>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pattern, placeholder_code, semester, credits, course_label
                 FROM elective_mappings ORDER BY position",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ElectiveMapping {
                    pattern: row.get(0)?,
                    placeholder_code: row.get(1)?,
                    semester: row.get(2)?,
                    credits: row.get(3)?,
                    course_label: row.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// 读取学生 USN 列表，可按学制过滤
    pub fn student_usns(&self, scheme: Option<&str>) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT usn FROM students WHERE (?1 IS NULL OR scheme = ?1) ORDER BY usn",
            )?;
            let rows = stmt.query_map(params![scheme], |row| row.get(0))?;
            Ok(rows.collect::<Result<Vec<String>, _>>()?)
        })
    }

    pub fn student_cgpa(&self, usn: &str) -> Result<Option<f64>, StoreError> {
        self.with_conn(|conn| {
            let cgpa = conn
                .query_row("SELECT cgpa FROM students WHERE usn = ?1", [usn], |row| {
                    row.get::<_, Option<f64>>(0)
                })
                .optional()?;
            Ok(cgpa.flatten())
        })
    }

    /// 某个 (学生, 课程, 学期) 的全部考试记录，按次数排序
    pub fn attempts(
        &self,
        usn: &str,
        subject_code: &str,
        semester: u8,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESULT_COLUMNS} FROM results
                 WHERE student_usn = ?1 AND subject_code = ?2 AND semester = ?3
                 ORDER BY attempt_number"
            ))?;
            let rows = stmt.query_map(params![usn, subject_code, semester], result_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn semester_summary(
        &self,
        usn: &str,
        semester: u8,
    ) -> Result<Option<SemesterSummary>, StoreError> {
        self.with_conn(|conn| {
            let summary = conn
                .query_row(
                    "SELECT student_usn, semester, sgpa, total_marks_obtained, total_marks_maximum,
                            percentage, total_credits, class_grade, has_backlogs, backlog_count
                     FROM semester_summaries WHERE student_usn = ?1 AND semester = ?2",
                    params![usn, semester],
                    |row| {
                        let class_grade: String = row.get(7)?;
                        Ok(SemesterSummary {
                            student_usn: row.get(0)?,
                            semester: row.get(1)?,
                            sgpa: row.get(2)?,
                            total_marks_obtained: row.get(3)?,
                            total_marks_maximum: row.get(4)?,
                            percentage: row.get(5)?,
                            total_credits: row.get(6)?,
                            class_grade: crate::models::ClassGrade::parse(&class_grade)
                                .unwrap_or(crate::models::ClassGrade::Fail),
                            has_backlogs: row.get(8)?,
                            backlog_count: row.get(9)?,
                        })
                    },
                )
                .optional()?;
            Ok(summary)
        })
    }
}

// ========== 事务内使用的 SQL 辅助函数 ==========

pub(crate) const RESULT_COLUMNS: &str = "student_usn, subject_code, semester, attempt_number, \
     internal_marks, external_marks, total_marks, letter_grade, grade_points, \
     result_status, is_elective, scraped_at";

pub(crate) fn result_from_row(row: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    Ok(ResultRecord {
        student_usn: row.get(0)?,
        subject_code: row.get(1)?,
        semester: row.get(2)?,
        attempt_number: row.get(3)?,
        marks: Marks::new(row.get(4)?, row.get(5)?, row.get(6)?),
        letter_grade: row.get(7)?,
        grade_points: row.get(8)?,
        result_status: row.get(9)?,
        is_elective: row.get(10)?,
        scraped_at: row.get(11)?,
    })
}

/// 最近一次考试记录
pub(crate) fn latest_attempt(
    conn: &Connection,
    usn: &str,
    subject_code: &str,
    semester: u8,
) -> rusqlite::Result<Option<ResultRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RESULT_COLUMNS} FROM results
             WHERE student_usn = ?1 AND subject_code = ?2 AND semester = ?3
             ORDER BY attempt_number DESC LIMIT 1"
        ),
        params![usn, subject_code, semester],
        result_from_row,
    )
    .optional()
}

pub(crate) fn insert_result(conn: &Connection, record: &ResultRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO results(student_usn, subject_code, semester, attempt_number,
                             internal_marks, external_marks, total_marks, letter_grade, grade_points,
                             result_status, is_elective, scraped_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.student_usn,
            record.subject_code,
            record.semester,
            record.attempt_number,
            record.marks.internal,
            record.marks.external,
            record.marks.total,
            record.letter_grade,
            record.grade_points,
            record.result_status,
            record.is_elective,
            record.scraped_at
        ],
    )?;
    Ok(())
}

/// 复核修正：原地更新外部成绩和总分，等级与绩点置空等待重算
pub(crate) fn apply_revaluation(
    conn: &Connection,
    record: &ResultRecord,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE results
         SET external_marks = ?1,
             total_marks = ?2,
             result_status = ?3,
             letter_grade = NULL,
             grade_points = NULL,
             scraped_at = ?4
         WHERE student_usn = ?5 AND subject_code = ?6 AND semester = ?7 AND attempt_number = ?8",
        params![
            record.marks.external,
            record.marks.total,
            record.result_status,
            record.scraped_at,
            record.student_usn,
            record.subject_code,
            record.semester,
            record.attempt_number
        ],
    )
}

/// 目录中没有的课程即时登记，保证外键成立
///
/// 已存在的课程不做任何修改。
pub(crate) fn ensure_subject(
    conn: &Connection,
    subject_code: &str,
    subject_name: &str,
    semester: u8,
    credits: Option<u32>,
    scheme: &str,
) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO subjects(subject_code, subject_name, semester, credits, scheme, is_placeholder)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![subject_code, subject_name, semester, credits, scheme],
    )?;
    if inserted > 0 {
        debug!("登记新课程: {} ({})", subject_code, subject_name);
    }
    Ok(inserted > 0)
}

/// 记录学生实际选择的选修课，补全目录
pub(crate) fn record_elective_option(
    conn: &Connection,
    subject_code: &str,
    subject_name: &str,
    semester: u8,
    credits: u32,
    placeholder_code: &str,
    scheme: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO elective_subjects(subject_code, subject_name, semester, credits, placeholder_code, scheme)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(subject_code) DO UPDATE SET
            subject_name = excluded.subject_name,
            placeholder_code = excluded.placeholder_code",
        params![subject_code, subject_name, semester, credits, placeholder_code, scheme],
    )?;
    Ok(())
}

/// 学生首次出现在结果页时登记，已有姓名时不覆盖
pub(crate) fn upsert_student_seen(
    conn: &Connection,
    usn: &str,
    name: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO students(usn, name) VALUES (?1, COALESCE(?2, ''))
         ON CONFLICT(usn) DO UPDATE SET
            name = CASE WHEN students.name = '' THEN COALESCE(?2, '') ELSE students.name END",
        params![usn, name],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subject;

    fn subject(code: &str, semester: u8, credits: Option<u32>) -> Subject {
        Subject {
            subject_code: code.to_string(),
            subject_name: format!("Subject {}", code),
            semester,
            credits,
            scheme: "21".to_string(),
            is_placeholder: false,
        }
    }

    fn record(usn: &str, code: &str, attempt: u32) -> ResultRecord {
        ResultRecord {
            student_usn: usn.to_string(),
            subject_code: code.to_string(),
            semester: 4,
            attempt_number: attempt,
            marks: Marks::new(40, 30, 70),
            letter_grade: None,
            grade_points: None,
            result_status: "P".to_string(),
            is_elective: false,
            scraped_at: "2024-01-01T00:00:00".to_string(),
        }
    }

    #[test]
    fn import_keeps_elective_order() {
        let store = ResultStore::open_in_memory().unwrap();
        let data = ReferenceData {
            students: Vec::new(),
            subjects: vec![subject("21CS42", 4, Some(4))],
            electives: crate::models::default_mappings(),
        };
        let stats = store.import_reference(&data).unwrap();
        assert_eq!(stats.subjects, 1);
        assert_eq!(stats.electives, data.electives.len());

        let loaded = store.elective_mappings().unwrap();
        assert_eq!(loaded, data.electives);
    }

    #[test]
    fn unique_attempt_key_is_enforced() {
        let store = ResultStore::open_in_memory().unwrap();
        store
            .import_reference(&ReferenceData {
                subjects: vec![subject("21CS42", 4, Some(4))],
                ..Default::default()
            })
            .unwrap();

        let rec = record("1BI21IS001", "21CS42", 1);
        store
            .with_transaction(|tx| Ok(insert_result(tx, &rec)?))
            .unwrap();
        let duplicate = store.with_transaction(|tx| Ok(insert_result(tx, &rec)?));
        assert!(duplicate.is_err());
        assert_eq!(store.attempts("1BI21IS001", "21CS42", 4).unwrap().len(), 1);
    }

    #[test]
    fn result_requires_known_subject() {
        let store = ResultStore::open_in_memory().unwrap();
        let rec = record("1BI21IS001", "21XX99", 1);
        let err = store.with_transaction(|tx| Ok(insert_result(tx, &rec)?));
        assert!(err.is_err());

        store
            .with_transaction(|tx| {
                ensure_subject(tx, "21XX99", "Unknown", 4, None, "21")?;
                insert_result(tx, &rec)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.attempts("1BI21IS001", "21XX99", 4).unwrap().len(), 1);
    }

    #[test]
    fn student_seen_does_not_clobber_name() {
        let store = ResultStore::open_in_memory().unwrap();
        store
            .with_transaction(|tx| {
                upsert_student_seen(tx, "1BI21IS001", Some("ASHA K"))?;
                upsert_student_seen(tx, "1BI21IS001", Some("OTHER"))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.student_usns(None).unwrap(), vec!["1BI21IS001"]);
        let name: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT name FROM students WHERE usn = '1BI21IS001'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(name, "ASHA K");
    }
}
