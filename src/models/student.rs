use serde::{Deserialize, Serialize};

/// 学生基本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub usn: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub discipline: Option<String>,
    /// 由成绩引擎写入，不允许手工设置
    #[serde(skip_deserializing)]
    pub cgpa: Option<f64>,
}

/// 是否为专升本（lateral entry）学生
///
/// USN 末尾三位学号在 400-499 之间，例如 `1BI23IS401`。
/// 这类学生没有第 1、2 学期的成绩。
pub fn is_lateral_entry(usn: &str) -> bool {
    let digits: String = usn
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.len() < 3 {
        return false;
    }
    digits[digits.len() - 3..]
        .parse::<u32>()
        .map(|roll| (400..=499).contains(&roll))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lateral_entry_roll_numbers() {
        assert!(is_lateral_entry("1BI23IS401"));
        assert!(is_lateral_entry("1BI23IS499"));
        assert!(!is_lateral_entry("1BI23IS001"));
        assert!(!is_lateral_entry("1BI23IS500"));
        assert!(!is_lateral_entry("IS"));
    }
}
