use serde::{Deserialize, Serialize};

/// 抓取类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchKind {
    /// 常规成绩（可能产生新的考试次数）
    Regular,
    /// 复核成绩（只修正外部成绩，不产生新的考试次数）
    Revaluation,
}

/// 一门课程的三项分数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Marks {
    pub internal: u32,
    pub external: u32,
    pub total: u32,
}

impl Marks {
    pub fn new(internal: u32, external: u32, total: u32) -> Self {
        Self {
            internal,
            external,
            total,
        }
    }
}

/// 被选修课规则命中的信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectiveChoice {
    pub placeholder_code: String,
    pub credits: u32,
}

/// 结果页中解析出来的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRow {
    pub subject_code: String,
    pub subject_name: String,
    /// 由课程代码推导出的学期
    pub semester: u8,
    pub marks: Marks,
    /// 复核页面中的原外部成绩，常规页面为 None
    pub previous_external: Option<u32>,
    pub result_status: String,
    pub elective: Option<ElectiveChoice>,
}

impl ParsedRow {
    pub fn is_elective(&self) -> bool {
        self.elective.is_some()
    }
}

/// 一个完整的结果页
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    /// 页面上显示的 USN，缺失时使用请求的 USN
    pub student_usn: Option<String>,
    pub student_name: Option<String>,
    pub rows: Vec<ParsedRow>,
}

/// 数据库中的一条考试记录
///
/// 唯一标识为 (student_usn, subject_code, semester, attempt_number)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub student_usn: String,
    pub subject_code: String,
    pub semester: u8,
    pub attempt_number: u32,
    pub marks: Marks,
    pub letter_grade: Option<String>,
    pub grade_points: Option<u32>,
    pub result_status: String,
    pub is_elective: bool,
    pub scraped_at: String,
}
