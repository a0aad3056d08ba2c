//! 基础设施层
//!
//! 持有稀缺资源（浏览器页面、OCR 进程、数据库连接），只暴露能力。

pub mod js_executor;
pub mod ocr;
pub mod portal;
pub mod store;

pub use js_executor::JsExecutor;
pub use ocr::{OcrEngine, OcrMode, TesseractCli};
pub use portal::{PortalSession, SessionFactory};
pub use store::{ImportStats, ResultStore};
