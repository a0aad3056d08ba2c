pub mod result_fetcher;
pub mod student_ctx;
pub mod student_flow;

pub use result_fetcher::{FetchState, ModalVerdict, ResultFetcher};
pub use student_ctx::StudentCtx;
pub use student_flow::{StudentFlow, StudentOutcome};
