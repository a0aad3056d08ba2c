use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅者
///
/// `RUST_LOG` 优先；否则按 `verbose` 选择 debug 或 info。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
/// - `title`: 本次运行的标题
pub fn init_log_file(log_file_path: &str, title: &str) -> Result<()> {
    let log_header = format!(
        "{}\n{} - {}\n{}\n\n",
        "=".repeat(60),
        title,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录批次启动信息
///
/// # 参数
/// - `kind`: 批次类型说明（常规 / 复核）
/// - `total`: 学生总数
/// - `workers`: 并发会话数
pub fn log_startup(kind: &str, total: usize, workers: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始{}成绩抓取", kind);
    info!("👥 学生数量: {}", total);
    info!("📊 并发会话数: {}", workers);
    info!("{}", "=".repeat(60));
}

/// 记录重试轮次开始
///
/// # 参数
/// - `round`: 轮次编号（从 1 开始）
/// - `pending`: 本轮待抓取的学生数
pub fn log_round_start(round: usize, pending: usize) {
    info!("\n{}", "=".repeat(60));
    info!("🔄 第 {} 轮抓取，待处理 {} 名学生", round, pending);
    info!("{}", "=".repeat(60));
}

/// 记录重试轮次结束
///
/// # 参数
/// - `round`: 轮次编号
/// - `success`: 本轮成功数量
/// - `failed`: 本轮失败数量
pub fn log_round_complete(round: usize, success: usize, failed: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 轮完成: 成功 {}/{}",
        round,
        success,
        success + failed
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功数量
/// - `failed`: 失败数量
/// - `total`: 总数
/// - `elapsed_seconds`: 总耗时
pub fn print_final_stats(success: usize, failed: usize, total: usize, elapsed_seconds: f64) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("⏱️ 耗时: {:.1} 秒", elapsed_seconds);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_by_characters() {
        assert_eq!(truncate_text("成绩查询页面", 2), "成绩...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn log_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        init_log_file(path.to_str().unwrap(), "成绩抓取日志").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.contains("成绩抓取日志"));
    }
}
