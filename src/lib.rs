//! 章节抓取服务 (Chapter Spider)
//!
//! 从目录页推断章节总数，按编号顺序渲染并落盘章节正文，
//! 任务在后台运行，可查询、取消与增量补缺。

pub mod core;
pub mod engine;
pub mod interfaces;
pub mod network;
pub mod ui;
pub mod utils;

pub use crate::core::config::AppConfig;
pub use crate::core::error::{Result, SpiderError};
pub use crate::engine::Orchestrator;
