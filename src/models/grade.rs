use serde::{Deserialize, Serialize};
use std::fmt;

/// 课程等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    O,
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    P,
    F,
}

impl LetterGrade {
    /// 按得分百分比划分等级
    pub fn from_percentage(percentage: f64) -> Self {
        match percentage {
            p if p >= 90.0 => LetterGrade::O,
            p if p >= 80.0 => LetterGrade::APlus,
            p if p >= 70.0 => LetterGrade::A,
            p if p >= 60.0 => LetterGrade::BPlus,
            p if p >= 50.0 => LetterGrade::B,
            p if p >= 40.0 => LetterGrade::C,
            p if p >= 35.0 => LetterGrade::P,
            _ => LetterGrade::F,
        }
    }

    /// 绩点
    pub fn points(self) -> u32 {
        match self {
            LetterGrade::O => 10,
            LetterGrade::APlus => 9,
            LetterGrade::A => 8,
            LetterGrade::BPlus => 7,
            LetterGrade::B => 6,
            LetterGrade::C => 5,
            LetterGrade::P => 4,
            LetterGrade::F => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::O => "O",
            LetterGrade::APlus => "A+",
            LetterGrade::A => "A",
            LetterGrade::BPlus => "B+",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::P => "P",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 学期等级（一等优秀 / 一等 / 二等 / 及格 / 不及格）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassGrade {
    #[serde(rename = "FCD")]
    FirstClassDistinction,
    #[serde(rename = "FC")]
    FirstClass,
    #[serde(rename = "SC")]
    SecondClass,
    #[serde(rename = "P")]
    Pass,
    #[serde(rename = "F")]
    Fail,
}

impl ClassGrade {
    /// 有不及格课程或 SGPA 低于 4.0 一律为 F
    pub fn from_sgpa(sgpa: f64, has_backlogs: bool) -> Self {
        if has_backlogs || sgpa < 4.0 {
            ClassGrade::Fail
        } else if sgpa >= 7.75 {
            ClassGrade::FirstClassDistinction
        } else if sgpa >= 6.25 {
            ClassGrade::FirstClass
        } else if sgpa >= 5.0 {
            ClassGrade::SecondClass
        } else {
            ClassGrade::Pass
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClassGrade::FirstClassDistinction => "FCD",
            ClassGrade::FirstClass => "FC",
            ClassGrade::SecondClass => "SC",
            ClassGrade::Pass => "P",
            ClassGrade::Fail => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FCD" => Some(ClassGrade::FirstClassDistinction),
            "FC" => Some(ClassGrade::FirstClass),
            "SC" => Some(ClassGrade::SecondClass),
            "P" => Some(ClassGrade::Pass),
            "F" => Some(ClassGrade::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for ClassGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 学生某学期的汇总，完全由最新一次考试记录推导
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterSummary {
    pub student_usn: String,
    pub semester: u8,
    pub sgpa: f64,
    pub total_marks_obtained: u32,
    pub total_marks_maximum: u32,
    pub percentage: f64,
    pub total_credits: u32,
    pub class_grade: ClassGrade,
    pub has_backlogs: bool,
    pub backlog_count: u32,
}

/// 保留两位小数
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
