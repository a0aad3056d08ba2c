//! 业务能力层（Services）
//!
//! 描述"我能做什么"，每个服务只处理一张验证码、一个结果页或一行成绩，
//! 不持有浏览器，不关心并发和重试。

pub mod attempt_reconciler;
pub mod captcha_solver;
pub mod grade_engine;
pub mod result_parser;

pub use attempt_reconciler::{AttemptReconciler, Decision, ReconcileSummary};
pub use captcha_solver::CaptchaSolver;
pub use grade_engine::{GradeEngine, GradeReport, PassPolicy, SkippedItem};
pub use result_parser::{parse_mark, semester_from_code, ResultParser};
