use std::time::Duration;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时运行的抓取会话数量
    pub max_workers: usize,
    /// 成绩查询页面 URL
    pub target_url: String,
    /// SQLite 数据库路径
    pub database_path: String,
    /// Chrome / Edge 可执行文件路径（为空则由 chromiumoxide 自动探测）
    pub chrome_executable: Option<String>,
    /// 单个学生允许的验证码尝试次数
    pub fetch_max_attempts: u32,
    /// 刷新验证码后的等待时间（毫秒）
    pub challenge_settle_ms: u64,
    /// 提交表单后等待弹窗的时间（毫秒）
    pub submit_settle_ms: u64,
    /// 等待结果页标记的最长时间（秒）
    pub result_wait_secs: u64,
    /// 验证码最短有效长度
    pub captcha_min_len: usize,
    /// tesseract 命令
    pub tesseract_cmd: String,
    /// 收敛重试的最大轮数
    pub max_retry_rounds: usize,
    // --- 及格线 ---
    pub pass_min_external: u32,
    pub pass_min_percent: f64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 7,
            target_url: "https://results.vtu.ac.in/".to_string(),
            database_path: "results.sqlite3".to_string(),
            chrome_executable: None,
            fetch_max_attempts: 5,
            challenge_settle_ms: 1500,
            submit_settle_ms: 3000,
            result_wait_secs: 10,
            captcha_min_len: 6,
            tesseract_cmd: "tesseract".to_string(),
            max_retry_rounds: 10,
            pass_min_external: 18,
            pass_min_percent: 40.0,
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_workers: env_parse("MAX_WORKERS").unwrap_or(default.max_workers),
            target_url: std::env::var("TARGET_URL").unwrap_or(default.target_url),
            database_path: std::env::var("DATABASE_PATH").unwrap_or(default.database_path),
            chrome_executable: std::env::var("CHROME_EXECUTABLE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or(default.chrome_executable),
            fetch_max_attempts: env_parse("FETCH_MAX_ATTEMPTS").unwrap_or(default.fetch_max_attempts),
            challenge_settle_ms: env_parse("CHALLENGE_SETTLE_MS").unwrap_or(default.challenge_settle_ms),
            submit_settle_ms: env_parse("SUBMIT_SETTLE_MS").unwrap_or(default.submit_settle_ms),
            result_wait_secs: env_parse("RESULT_WAIT_SECS").unwrap_or(default.result_wait_secs),
            captcha_min_len: env_parse("CAPTCHA_MIN_LEN").unwrap_or(default.captcha_min_len),
            tesseract_cmd: std::env::var("TESSERACT_CMD").unwrap_or(default.tesseract_cmd),
            max_retry_rounds: env_parse("MAX_RETRY_ROUNDS").unwrap_or(default.max_retry_rounds),
            pass_min_external: env_parse("PASS_MIN_EXTERNAL").unwrap_or(default.pass_min_external),
            pass_min_percent: env_parse("PASS_MIN_PERCENT").unwrap_or(default.pass_min_percent),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
        }
    }

    pub fn challenge_settle(&self) -> Duration {
        Duration::from_millis(self.challenge_settle_ms)
    }

    pub fn submit_settle(&self) -> Duration {
        Duration::from_millis(self.submit_settle_ms)
    }

    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// 成绩门户的页面选择器
///
/// 门户改版时只需要改这里，不会自动适配。
#[derive(Clone, Debug)]
pub struct PortalSelectors {
    pub captcha_image: String,
    pub captcha_refresh: String,
    pub usn_input: String,
    pub captcha_input: String,
    pub submit_button: String,
    /// 结果页加载完成的标志
    pub results_marker: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            captcha_image: "#raj > div:nth-of-type(2) > div:nth-of-type(2) > img".to_string(),
            captcha_refresh: "#raj > div:nth-of-type(2) > div:nth-of-type(2) > p > a".to_string(),
            usn_input: "input[name='lns']".to_string(),
            captcha_input: "input[name='captchacode']".to_string(),
            submit_button: "#submit".to_string(),
            results_marker: "div.divTable".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_portal_policy() {
        let config = Config::default();
        assert_eq!(config.fetch_max_attempts, 5);
        assert_eq!(config.captcha_min_len, 6);
        assert_eq!(config.pass_min_external, 18);
        assert_eq!(config.result_wait(), Duration::from_secs(10));
    }
}
