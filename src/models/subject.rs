use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 课程目录中的一门课程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_code: String,
    pub subject_name: String,
    pub semester: u8,
    /// 学分未知时为 None，成绩计算会跳过该课程
    #[serde(default)]
    pub credits: Option<u32>,
    pub scheme: String,
    /// 选修课占位（如 21XX64X）
    #[serde(default)]
    pub is_placeholder: bool,
}

impl Subject {
    /// 课程满分
    ///
    /// 大型项目、实习、论文为 200 分，第 8 学期名称含 MAJOR 的课程同样为 200 分。
    pub fn max_marks(&self) -> u32 {
        max_marks_for(&self.subject_name, self.semester)
    }
}

/// 根据课程名称与学期推断满分
pub fn max_marks_for(subject_name: &str, semester: u8) -> u32 {
    let name = subject_name.to_uppercase();
    if ["MAJOR PROJECT", "INTERNSHIP", "DISSERTATION"]
        .iter()
        .any(|keyword| name.contains(keyword))
    {
        return 200;
    }
    if semester == 8 && name.contains("MAJOR") {
        return 200;
    }
    100
}

/// 根据课程代码前缀推断学制
///
/// `21CS42` → "21"，`BCS401` → "22"
pub fn infer_scheme(subject_code: &str) -> String {
    let prefix: String = subject_code.chars().take(2).collect();
    if prefix.len() == 2 && prefix.chars().all(|c| c.is_ascii_digit()) {
        prefix
    } else if subject_code.starts_with('B') {
        "22".to_string()
    } else {
        "21".to_string()
    }
}

/// 一条选修课映射规则：实际课程代码 → 目录中的占位组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectiveMapping {
    pub pattern: String,
    pub placeholder_code: String,
    pub semester: u8,
    pub credits: u32,
    pub course_label: String,
}

impl ElectiveMapping {
    fn new(pattern: &str, placeholder: &str, semester: u8, credits: u32, label: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            placeholder_code: placeholder.to_string(),
            semester,
            credits,
            course_label: label.to_string(),
        }
    }
}

struct CompiledRule {
    mapping: ElectiveMapping,
    regex: Regex,
}

/// 有序的选修课匹配表，先匹配者胜出
pub struct ElectiveTable {
    rules: Vec<CompiledRule>,
}

impl ElectiveTable {
    /// 按给定顺序编译规则，每条规则都锚定在代码开头
    pub fn new(mappings: Vec<ElectiveMapping>) -> Result<Self, ConfigError> {
        let rules = mappings
            .into_iter()
            .map(|mapping| {
                let regex = Regex::new(&format!("^(?:{})", mapping.pattern)).map_err(|source| {
                    ConfigError::ElectivePattern {
                        placeholder: mapping.placeholder_code.clone(),
                        source,
                    }
                })?;
                Ok(CompiledRule { mapping, regex })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// 2021 学制的默认规则
    pub fn scheme_2021() -> Self {
        // 内置规则均为合法正则
        Self::new(default_mappings()).unwrap_or_else(|_| Self { rules: Vec::new() })
    }

    pub fn classify(&self, subject_code: &str) -> Option<&ElectiveMapping> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(subject_code))
            .map(|rule| &rule.mapping)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub fn default_mappings() -> Vec<ElectiveMapping> {
    vec![
        ElectiveMapping::new(r"21CS38[0-9]", "21CS38X", 3, 1, "Ability Enhancement Course - III"),
        ElectiveMapping::new(r"21CSL38[0-9]", "21CSL38X", 3, 1, "Ability Enhancement Course - III"),
        ElectiveMapping::new(r"21CS48[0-9]", "21CS48X", 4, 1, "Ability Enhancement Course - IV"),
        ElectiveMapping::new(r"21CSL48[0-9]", "21CS48LX", 4, 1, "Ability Enhancement Course - IV"),
        ElectiveMapping::new(r"21[A-Z]{2,4}56", "21XX56", 5, 2, "Research Methodology and IPR"),
        ElectiveMapping::new(r"21CS58[0-9]", "21CS58X", 5, 1, "Ability Enhancement Course - V"),
        ElectiveMapping::new(r"21CSL58[0-9]", "21CSL58X", 5, 1, "Ability Enhancement Course - V"),
        ElectiveMapping::new(r"21[A-Z]{2,4}64[0-9]", "21XX64X", 6, 3, "Professional Elective Course - I"),
        ElectiveMapping::new(r"21[A-Z]{2,4}65[0-9]", "21XX65X", 6, 3, "Open Elective Course - I"),
        ElectiveMapping::new(r"21[A-Z]{2,4}73[0-9]", "21XX73X", 7, 3, "Professional Elective Course - II"),
        ElectiveMapping::new(r"21[A-Z]{2,4}74[0-9]", "21XX74X", 7, 3, "Professional Elective Course - III"),
        ElectiveMapping::new(r"21[A-Z]{2,4}75[0-9]", "21XX75X", 7, 3, "Open Elective Course - II"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_elective_matches_lab_group() {
        let table = ElectiveTable::scheme_2021();
        let hit = table.classify("21CSL481").unwrap();
        assert_eq!(hit.placeholder_code, "21CS48LX");
        assert_eq!(hit.credits, 1);
        assert_eq!(hit.semester, 4);
    }

    #[test]
    fn core_subject_matches_nothing() {
        let table = ElectiveTable::scheme_2021();
        assert!(table.classify("21CS301").is_none());
        assert!(table.classify("21CS42").is_none());
    }

    #[test]
    fn first_match_wins() {
        let table = ElectiveTable::new(vec![
            ElectiveMapping::new(r"21CS6", "FIRST", 6, 2, "a"),
            ElectiveMapping::new(r"21[A-Z]{2,4}64[0-9]", "21XX64X", 6, 3, "b"),
        ])
        .unwrap();
        assert_eq!(table.classify("21CS641").unwrap().placeholder_code, "FIRST");
        assert_eq!(table.classify("21AI642").unwrap().placeholder_code, "21XX64X");
    }

    #[test]
    fn patterns_are_anchored() {
        let table = ElectiveTable::scheme_2021();
        assert!(table.classify("X21CS641").is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = ElectiveTable::new(vec![ElectiveMapping::new("21CS(", "BAD", 1, 1, "x")]);
        assert!(err.is_err());
    }

    #[test]
    fn project_subjects_have_larger_maximum() {
        assert_eq!(max_marks_for("Major Project Phase II", 8), 200);
        assert_eq!(max_marks_for("Research Internship", 7), 200);
        assert_eq!(max_marks_for("Mini Project", 5), 100);
        assert_eq!(max_marks_for("Project Management", 6), 100);
    }

    #[test]
    fn scheme_from_code_prefix() {
        assert_eq!(infer_scheme("21CS42"), "21");
        assert_eq!(infer_scheme("BCS401"), "22");
    }
}
