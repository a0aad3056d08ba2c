//! 结果页解析服务
//!
//! 一个结果页可能包含多个学期的成绩表，全部展开后逐行解析。
//! 学期只由课程代码推导，页面上的学期标题不可信。

use std::sync::Arc;

use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::models::{
    ElectiveChoice, ElectiveTable, FetchKind, Marks, ParsedPage, ParsedRow,
};

/// 不含数字时记为 0 的标记（NE 不合格、ABS 缺考、X/W 扣留 等）
const SENTINELS: [&str; 8] = ["NE", "ABS", "X", "A", "W", "F", "P", "-"];

const REGULAR_CELLS: usize = 6;
const REVALUATION_CELLS: usize = 9;

/// 结果页解析器
pub struct ResultParser {
    electives: Arc<ElectiveTable>,
    table: Selector,
    row: Selector,
    cell: Selector,
    td: Selector,
}

impl ResultParser {
    pub fn new(electives: Arc<ElectiveTable>) -> Result<Self> {
        Ok(Self {
            electives,
            table: selector("div.divTable")?,
            row: selector("div.divTableRow")?,
            cell: selector("div.divTableCell")?,
            td: selector("td")?,
        })
    }

    /// 解析整个结果页
    ///
    /// # 参数
    /// - `html`: 页面源码
    /// - `kind`: 常规或复核页面，两者的列布局不同
    pub fn parse(&self, html: &str, kind: FetchKind) -> ParsedPage {
        let document = Html::parse_document(html);

        let tds: Vec<String> = document.select(&self.td).map(cell_text).collect();
        let student_usn = tds.get(1).map(|t| strip_label(t)).filter(|t| !t.is_empty());
        let student_name = tds.get(3).map(|t| strip_label(t)).filter(|t| !t.is_empty());

        let mut rows = Vec::new();
        for (index, table) in document.select(&self.table).enumerate() {
            // 每张表的第一行是表头
            let table_rows: Vec<ElementRef> = table.select(&self.row).skip(1).collect();
            debug!("成绩表 {}: {} 行", index + 1, table_rows.len());

            for row in table_rows {
                let cells: Vec<String> = row.select(&self.cell).map(cell_text).collect();
                if let Some(parsed) = self.parse_cells(&cells, kind) {
                    rows.push(parsed);
                }
            }
        }

        ParsedPage {
            student_usn,
            student_name,
            rows,
        }
    }

    fn parse_cells(&self, cells: &[String], kind: FetchKind) -> Option<ParsedRow> {
        let required = match kind {
            FetchKind::Regular => REGULAR_CELLS,
            FetchKind::Revaluation => REVALUATION_CELLS,
        };
        if cells.len() < required {
            if kind == FetchKind::Revaluation {
                warn!("复核成绩行只有 {} 列，已跳过: {:?}", cells.len(), cells);
            }
            return None;
        }

        let subject_code = cells[0].trim().to_string();
        if subject_code.is_empty() || subject_code == "Subject Code" {
            return None;
        }
        let subject_name = cells[1].trim().to_string();

        let Some(semester) = semester_from_code(&subject_code) else {
            warn!("无法从课程代码推导学期，已跳过: {}", subject_code);
            return None;
        };

        let internal = parse_mark(&cells[2]);
        let (external, previous_external, total_token, result_status) = match kind {
            FetchKind::Regular => (parse_mark(&cells[3]), None, &cells[4], &cells[5]),
            FetchKind::Revaluation => {
                let old_external = parse_mark(&cells[3]);
                // 复核外部成绩为空时沿用原成绩
                let external = mark_value(&cells[5]).unwrap_or(old_external);
                (external, Some(old_external), &cells[7], &cells[8])
            }
        };
        let total = mark_value(total_token).unwrap_or(internal + external);

        let elective = self
            .electives
            .classify(&subject_code)
            .map(|mapping| ElectiveChoice {
                placeholder_code: mapping.placeholder_code.clone(),
                credits: mapping.credits,
            });

        Some(ParsedRow {
            subject_code,
            subject_name,
            semester,
            marks: Marks::new(internal, external, total),
            previous_external,
            result_status: result_status.trim().to_string(),
            elective,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("无效的选择器 {}: {}", css, e))
}

fn cell_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// 去掉 " : " 形式的标签前缀
fn strip_label(text: &str) -> String {
    text.trim_start_matches([' ', ':']).trim().to_string()
}

/// 解析分数单元格
///
/// `"45"` → 45，`"NE (13)"` → 13，`"NE"` / `"ABS"` / `"-"` → 0
pub fn parse_mark(token: &str) -> u32 {
    mark_value(token).unwrap_or(0)
}

/// 单元格中携带的分数；纯标记或空白返回 None
fn mark_value(token: &str) -> Option<u32> {
    let token = token.trim();
    if token.is_empty() || SENTINELS.contains(&token) {
        return None;
    }

    if let Some(start) = token.find('(') {
        let inner = &token[start + 1..];
        let inner = inner.split(')').next().unwrap_or_default();
        return inner.trim().parse().ok();
    }

    let digits: String = token
        .trim_start()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// 由课程代码推导学期
///
/// 依次尝试：
/// 1. 新学制 `B` + 字母 + 数字（`BCS401` → 4）
/// 2. 旧学制 两位年份 + 字母 + 数字（`21CS42` → 4）
/// 3. 代码中的第一个数字
///
/// 结果不在 1-8 之间时返回 None。
pub fn semester_from_code(code: &str) -> Option<u8> {
    let chars: Vec<char> = code.trim().chars().collect();

    let digit_after_letters = |start: usize| -> Option<u8> {
        let letters = chars[start..]
            .iter()
            .take_while(|c| c.is_ascii_uppercase())
            .count();
        if letters == 0 {
            return None;
        }
        chars
            .get(start + letters)
            .and_then(|c| c.to_digit(10))
            .map(|d| d as u8)
    };

    let newer = if chars.first() == Some(&'B') {
        digit_after_letters(1)
    } else {
        None
    };
    let older = if chars.len() > 2 && chars[0].is_ascii_digit() && chars[1].is_ascii_digit() {
        digit_after_letters(2)
    } else {
        None
    };
    let fallback = || chars.iter().find_map(|c| c.to_digit(10)).map(|d| d as u8);

    newer
        .or(older)
        .or_else(fallback)
        .filter(|sem| (1..=8).contains(sem))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResultParser {
        ResultParser::new(Arc::new(ElectiveTable::scheme_2021())).unwrap()
    }

    fn page(rows: &[&[&str]]) -> String {
        let mut html = String::from(
            "<html><body><table>\
             <tr><td>University Seat Number</td><td> : 1BI21IS001</td></tr>\
             <tr><td>Student Name</td><td> : ASHA K</td></tr>\
             </table>\
             <div class=\"divTable\"><div class=\"divTableRow\">\
             <div class=\"divTableCell\">Subject Code</div></div>",
        );
        for row in rows {
            html.push_str("<div class=\"divTableRow\">");
            for cell in *row {
                html.push_str(&format!("<div class=\"divTableCell\">{}</div>", cell));
            }
            html.push_str("</div>");
        }
        html.push_str("</div></body></html>");
        html
    }

    #[test]
    fn mark_tokens() {
        let tokens = ["45", "NE (13)", "NE", "ABS", "-", "X"];
        let parsed: Vec<u32> = tokens.iter().map(|t| parse_mark(t)).collect();
        assert_eq!(parsed, vec![45, 13, 0, 0, 0, 0]);
        assert_eq!(parse_mark(""), 0);
        assert_eq!(parse_mark(" 38 "), 38);
        assert_eq!(parse_mark("W"), 0);
    }

    #[test]
    fn semester_from_subject_code() {
        assert_eq!(semester_from_code("BCS401"), Some(4));
        assert_eq!(semester_from_code("BMATS101"), Some(1));
        assert_eq!(semester_from_code("BESCK204C"), Some(2));
        assert_eq!(semester_from_code("21CS42"), Some(4));
        assert_eq!(semester_from_code("21INT82"), Some(8));
        assert_eq!(semester_from_code("21CSL481"), Some(4));
        assert_eq!(semester_from_code("18CS0"), None);
        assert_eq!(semester_from_code("XYZ"), None);
    }

    #[test]
    fn parses_regular_page() {
        let html = page(&[
            &["21CS42", "Design and Analysis of Algorithms", "45", "38", "83", "P"],
            &["21CSL481", "Web Programming Lab", "48", "NE", "-", "F"],
            &["21CS301", "Too", "few"],
        ]);
        let parsed = parser().parse(&html, FetchKind::Regular);

        assert_eq!(parsed.student_usn.as_deref(), Some("1BI21IS001"));
        assert_eq!(parsed.student_name.as_deref(), Some("ASHA K"));
        assert_eq!(parsed.rows.len(), 2);

        let core = &parsed.rows[0];
        assert_eq!(core.semester, 4);
        assert_eq!(core.marks, Marks::new(45, 38, 83));
        assert!(!core.is_elective());

        let lab = &parsed.rows[1];
        assert_eq!(lab.marks, Marks::new(48, 0, 48));
        assert_eq!(lab.elective.as_ref().unwrap().placeholder_code, "21CS48LX");
        assert_eq!(lab.elective.as_ref().unwrap().credits, 1);
    }

    #[test]
    fn semester_comes_from_code_not_banner() {
        let html = page(&[
            &["21CS42", "DAA", "45", "38", "83", "P"],
            &["21MAT31", "Transform Calculus", "40", "30", "70", "P"],
        ]);
        let parsed = parser().parse(&html, FetchKind::Regular);
        let semesters: Vec<u8> = parsed.rows.iter().map(|r| r.semester).collect();
        assert_eq!(semesters, vec![4, 3]);
    }

    #[test]
    fn parses_revaluation_layout() {
        let html = page(&[
            &["21CS42", "DAA", "45", "20", "F", "31", "P", "76", "P"],
            &["21CS43", "OS", "40", "25", "P", "-", "P", "-", "P"],
            &["21CS44", "short", "40", "25", "P", "30"],
        ]);
        let parsed = parser().parse(&html, FetchKind::Revaluation);
        assert_eq!(parsed.rows.len(), 2);

        let revised = &parsed.rows[0];
        assert_eq!(revised.marks, Marks::new(45, 31, 76));
        assert_eq!(revised.previous_external, Some(20));
        assert_eq!(revised.result_status, "P");

        let unchanged = &parsed.rows[1];
        assert_eq!(unchanged.marks, Marks::new(40, 25, 65));
    }

    #[test]
    fn page_without_tables_has_no_rows() {
        let parsed = parser().parse("<html><body>nothing</body></html>", FetchKind::Regular);
        assert!(parsed.rows.is_empty());
        assert!(parsed.student_usn.is_none());
    }
}
