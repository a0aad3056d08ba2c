//! 错误类型
//!
//! 按照失败的"可重试性"划分：
//! - 抓取内部可重试的失败（验证码、超时）在 `workflow` 内部消化
//! - 需要上报给调用方的失败通过 `FetchFailure` 出现在失败列表中
//! - 数据库不可达是唯一会中止整个批次的错误

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Store(#[from] StoreError),
    /// 成绩计算错误
    #[error("成绩计算错误: {0}")]
    Grade(#[from] GradeError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 单个学生抓取失败的原因
///
/// 只有在抓取预算耗尽或门户明确拒绝时才会产生，
/// 单次验证码识别失败不会出现在这里。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// 门户明确表示 USN 无效，重试没有意义
    #[error("USN 无效或不存在")]
    InvalidIdentifier,
    /// 结果页标记在等待时间内没有出现
    #[error("等待结果页超时 (已尝试 {attempts} 次)")]
    Timeout { attempts: u32 },
    /// 验证码始终无法通过
    #[error("验证码未能通过 (已尝试 {attempts} 次)")]
    ChallengeExhausted { attempts: u32 },
    /// 结果页已加载但没有任何成绩行
    #[error("结果页没有成绩数据")]
    EmptyResult,
    /// 浏览器会话无法启动
    #[error("无法打开浏览器会话: {0}")]
    SessionUnavailable(String),
}

impl FetchFailure {
    /// 是否值得在下一轮重试
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchFailure::InvalidIdentifier)
    }
}

/// 数据库错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 数据库本身不可用，整个批次必须终止
    #[error("数据库不可用: {0}")]
    Unavailable(String),
    /// 单行写入失败，跳过该行即可
    #[error("写入 {key} 失败: {source}")]
    Row {
        key: String,
        #[source]
        source: rusqlite::Error,
    },
    /// 阻塞线程上的数据库任务异常终止
    #[error("数据库任务异常终止: {0}")]
    Join(String),
    /// 其他 SQL 错误
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

impl StoreError {
    /// 是否属于致命错误
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) | StoreError::Join(_) => true,
            StoreError::Row { .. } => false,
            StoreError::Sql(e) => is_connection_level(e),
        }
    }

    /// 将 rusqlite 错误归类到行级或连接级
    pub fn classify(key: impl Into<String>, err: rusqlite::Error) -> Self {
        if is_connection_level(&err) {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Row {
                key: key.into(),
                source: err,
            }
        }
    }
}

fn is_connection_level(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err.sqlite_error_code() {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull,
        ) => true,
        _ => false,
    }
}

/// 成绩计算错误
#[derive(Debug, Error)]
pub enum GradeError {
    /// 同一学期的重算正在进行中
    #[error("第 {0} 学期的成绩正在重新计算，拒绝重叠执行")]
    AlreadyRunning(u8),
    /// 学期号不合法
    #[error("学期号必须在 1-8 之间: {0}")]
    InvalidSemester(u8),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 选修课匹配规则无法编译
    #[error("选修课规则 {placeholder} 的正则无效: {source}")]
    ElectivePattern {
        placeholder: String,
        #[source]
        source: regex::Error,
    },
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_is_not_retryable() {
        assert!(!FetchFailure::InvalidIdentifier.is_retryable());
        assert!(FetchFailure::Timeout { attempts: 5 }.is_retryable());
        assert!(FetchFailure::ChallengeExhausted { attempts: 5 }.is_retryable());
        assert!(FetchFailure::EmptyResult.is_retryable());
        assert!(FetchFailure::SessionUnavailable("chrome".into()).is_retryable());
    }

    #[test]
    fn constraint_violation_is_row_level() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".to_string()),
        );
        let classified = StoreError::classify("1BI21IS001/21CS42", err);
        assert!(!classified.is_fatal());
    }

    #[test]
    fn cannot_open_is_fatal() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert!(StoreError::classify("db", err).is_fatal());
        assert!(StoreError::Unavailable("gone".to_string()).is_fatal());
    }
}
