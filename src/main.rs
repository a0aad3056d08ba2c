use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use results_harvester::models::{load_all_toml_files, load_reference_data};
use results_harvester::utils::logging;
use results_harvester::{
    BatchReport, BatchStatus, ChromeSessionFactory, Config, ResultStore, ResultsService,
    TesseractCli,
};

/// 部分成功时的退出码
const EXIT_PARTIAL: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "results-harvester", version, about = "批量抓取成绩门户并计算 SGPA / CGPA")]
struct Cli {
    /// SQLite 数据库路径
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 导入学生、课程和选修课规则（单个 TOML 文件或文件夹）
    Import { path: PathBuf },
    /// 常规成绩抓取
    Scrape {
        #[command(flatten)]
        target: Target,
        /// 期望学期（用于跳过专升本学生的第 1、2 学期）
        #[arg(long)]
        semester: Option<u8>,
    },
    /// 复核成绩抓取
    Revaluation {
        #[command(flatten)]
        target: Target,
    },
    /// 重算某学期的成绩
    Grades {
        semester: u8,
        /// 以 JSON 输出报告
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, clap::Args)]
struct Target {
    /// 成绩查询页面
    #[arg(long, env = "TARGET_URL")]
    url: Option<String>,
    /// 并发会话数
    #[arg(long, env = "MAX_WORKERS")]
    workers: Option<usize>,
    /// 只抓取该学制的学生（未指定 USN 时从数据库读取）
    #[arg(long)]
    scheme: Option<String>,
    /// 每行一个 USN 的文件
    #[arg(long)]
    usn_file: Option<PathBuf>,
    /// 直接指定的 USN
    usns: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }

    // 初始化日志
    logging::init(config.verbose_logging);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    let store = Arc::new(ResultStore::open(&config.database_path)?);

    match cli.command {
        Command::Import { path } => {
            let data = if path.is_dir() {
                load_all_toml_files(&path.to_string_lossy()).await?
            } else {
                load_reference_data(&path).await?
            };
            let stats = store.import_reference(&data)?;
            info!(
                "✅ 导入完成: {} 名学生, {} 门课程, {} 条选修规则",
                stats.students, stats.subjects, stats.electives
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Scrape { target, semester } => {
            let (service, url, workers, usns) = prepare(&config, store, &target).await?;
            let report = service.scrape_batch(&url, &usns, semester, workers).await?;
            Ok(batch_exit_code(&report))
        }
        Command::Revaluation { target } => {
            let (service, url, workers, usns) = prepare(&config, store, &target).await?;
            let report = service.scrape_revaluation_batch(&url, &usns, workers).await?;
            Ok(batch_exit_code(&report))
        }
        Command::Grades { semester, json } => {
            let service = build_service(&config, store)?;
            let report = service.recompute_grades(semester).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                info!("📊 学生人数: {}", report.students_processed);
                info!("📈 平均 SGPA: {:?}", report.average_sgpa);
                info!(
                    "   最高 {:?} / 最低 {:?}",
                    report.highest_sgpa, report.lowest_sgpa
                );
                info!("⚠️ 有挂科的学生: {}", report.backlog_students);
                for (grade, count) in &report.class_distribution {
                    info!("   {}: {}", grade, count);
                }
                for skipped in &report.skipped {
                    warn!(
                        "跳过 {} {}: {}",
                        skipped.student_usn,
                        skipped.subject_code.as_deref().unwrap_or("-"),
                        skipped.reason
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_service(config: &Config, store: Arc<ResultStore>) -> Result<ResultsService> {
    let sessions = Arc::new(ChromeSessionFactory::new(config));
    let ocr = Arc::new(TesseractCli::new(config.tesseract_cmd.clone()));
    Ok(ResultsService::new(config.clone(), store, sessions, ocr)?)
}

async fn prepare(
    config: &Config,
    store: Arc<ResultStore>,
    target: &Target,
) -> Result<(ResultsService, String, usize, Vec<String>)> {
    logging::init_log_file(&config.output_log_file, "成绩抓取日志")?;

    let mut usns = target.usns.clone();
    if let Some(file) = &target.usn_file {
        usns.extend(read_usn_file(file).await?);
    }
    if usns.is_empty() {
        usns = store.student_usns(target.scheme.as_deref())?;
        info!("📁 从数据库读取到 {} 名学生", usns.len());
    }

    let url = target.url.clone().unwrap_or_else(|| config.target_url.clone());
    let workers = target.workers.unwrap_or(config.max_workers);
    let service = build_service(config, store)?;
    Ok((service, url, workers, usns))
}

async fn read_usn_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取 USN 文件: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn batch_exit_code(report: &BatchReport) -> ExitCode {
    match report.status() {
        BatchStatus::Complete => ExitCode::SUCCESS,
        BatchStatus::Partial => {
            warn!("⚠️ 最终失败 {} 名学生:", report.failed.len());
            for failed in &report.failed {
                warn!("   {} - {}", failed.usn, failed.reason);
            }
            if !report.not_attempted.is_empty() {
                warn!("⚠️ 未处理 {} 名学生", report.not_attempted.len());
            }
            ExitCode::from(EXIT_PARTIAL)
        }
    }
}
