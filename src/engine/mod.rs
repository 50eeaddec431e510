//! 抓取引擎 (Scrape Engine)
//!
//! `discovery` 推断章节总数，`fetch` 执行顺序抓取循环，
//! `orchestrator` 负责任务受理、后台调度与终态写入。

pub mod discovery;
pub mod fetch;
pub mod orchestrator;

pub use discovery::{ChapterIndexResolver, TocSnapshot};
pub use fetch::{ChapterOutcome, FetchLoop, FetchSummary, ProgressSink};
pub use orchestrator::{
    CancelOutcome, GapPlan, Orchestrator, ScrapeRequest, Submission, UpdateOutcome, plan_gap_fill,
};
