//! 学生抓取上下文
//!
//! 封装"我正在抓哪个学生的哪类成绩"这一信息

use std::fmt::Display;

use crate::models::FetchKind;

/// 学生抓取上下文
#[derive(Debug, Clone)]
pub struct StudentCtx {
    /// 学生 USN
    pub usn: String,

    /// 在本轮中的序号（仅用于日志显示，从 1 开始）
    pub index: usize,

    /// 本轮学生总数（仅用于日志显示）
    pub total: usize,

    /// 常规或复核
    pub kind: FetchKind,

    /// 调用方期望的学期，只用于判断专升本学生是否需要跳过
    pub semester_hint: Option<u8>,
}

impl StudentCtx {
    /// 创建新的学生上下文
    pub fn new(
        usn: impl Into<String>,
        index: usize,
        total: usize,
        kind: FetchKind,
        semester_hint: Option<u8>,
    ) -> Self {
        Self {
            usn: usn.into(),
            index,
            total,
            kind,
            semester_hint,
        }
    }
}

impl Display for StudentCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[学生 {} {}/{}]", self.usn, self.index, self.total)
    }
}
