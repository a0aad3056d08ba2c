//! # Results Harvester
//!
//! 从带验证码的大学成绩门户批量抓取学生成绩，整理成按考试次数记录的历史，
//! 并计算课程等级、SGPA、CGPA 和学期等级。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `PortalSession` / `SessionFactory` - 一个会话一个浏览器
//! - `OcrEngine` - 图片 → 文字
//! - `ResultStore` - 唯一的数据库连接，所有 worker 的唯一同步点
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `CaptchaSolver` - 验证码识别
//! - `ResultParser` - 结果页解析、学期推导、选修课归类
//! - `AttemptReconciler` - 新考试 / 重复抓取 / 复核修正 的判定与写入
//! - `GradeEngine` - 等级、SGPA、CGPA 重算
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个学生"的完整处理流程
//! - `StudentCtx` - 上下文封装（USN + 抓取类型）
//! - `ResultFetcher` - 验证码 → 提交 → 结果页 状态机
//! - `StudentFlow` - 流程编排（跳过判断 → 抓取 → 写库）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 一轮批量抓取，管理并发
//! - `orchestrator/retry_controller` - 收敛重试
//! - `orchestrator/results_service` - 对外入口
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::ChromeSessionFactory;
pub use config::{Config, PortalSelectors};
pub use error::{AppError, AppResult, FetchFailure};
pub use infrastructure::{OcrEngine, PortalSession, ResultStore, SessionFactory, TesseractCli};
pub use models::{FetchKind, ParsedPage, ResultRecord};
pub use orchestrator::{BatchReport, BatchStatus, ResultsService};
pub use services::GradeReport;
pub use workflow::{StudentCtx, StudentFlow};
