//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量抓取和重试调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量抓取编排器
//! - 对一组学生运行一轮抓取
//! - 控制并发数量（Semaphore）
//! - 按完成顺序收集结果（JoinSet）
//! - 处理取消和数据库致命错误
//!
//! ### `retry_controller` - 收敛重试控制器
//! - 对失败集合反复运行新的一轮
//! - 失败数量连续两轮不变时停止
//!
//! ### `results_service` - 对外入口
//! - 组装所有组件
//! - 暴露 scrape_batch / scrape_revaluation_batch / recompute_grades
//!
//! ## 层次关系
//!
//! ```text
//! results_service
//!     ↓
//! retry_controller (处理多轮)
//!     ↓
//! batch_processor (处理 Vec<USN>)
//!     ↓
//! workflow::StudentFlow (处理单个学生)
//!     ↓
//! services (能力层：captcha / parser / reconciler / grades)
//!     ↓
//! infrastructure (基础设施：会话 / OCR / 数据库)
//! ```

pub mod batch_processor;
pub mod results_service;
pub mod retry_controller;

// 重新导出主要类型
pub use batch_processor::{BatchOrchestrator, CancelToken, RoundPlan, RoundResult};
pub use results_service::{BatchReport, BatchStatus, FailedStudent, ResultsService};
pub use retry_controller::{ConvergentRetryController, RetryOutcome};
