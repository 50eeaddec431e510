//! 错误处理体系 (Error Handling System)
//!
//! 定义领域相关的错误类型以及全局 Result 别名。
//! 章节级错误 (`PageUnavailable` / `ContentTooShort`) 由抓取循环就地消化，
//! 任务级错误则写入 ScrapeJob 的 error 字段。

use thiserror::Error;

use crate::core::job::JobId;

/// 全局错误定义 (Spider Domain Errors)
#[derive(Error, Debug)]
pub enum SpiderError {
    /// 目录标识 (TOC identifier) 或请求参数不合法，任务不会被创建
    #[error("Parsing error: {0}")]
    Parse(String),

    /// 页面渲染失败或等待超时
    #[error("Page unavailable: {url} ({reason})")]
    PageUnavailable { url: String, reason: String },

    /// 正文过短，视为未加载完成或被拦截的页面
    #[error("Content too short ({len} characters, minimum {min})")]
    ContentTooShort { len: usize, min: usize },

    /// 所有章节数推断策略均未命中
    #[error("Could not detect total chapters: {0}")]
    DiscoveryFailed(String),

    #[error("Job id already registered: {0}")]
    RegistryConflict(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// 浏览器进程启动或 CDP 协议层故障
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// 后台任务内部故障 (panic)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 全局 Result 别名
pub type Result<T> = std::result::Result<T, SpiderError>;

impl SpiderError {
    pub fn page_unavailable(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SpiderError::PageUnavailable {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否为章节级错误
    ///
    /// 章节级错误只写入旁路错误记录 (sidecar)，不会中断任务。
    pub fn is_chapter_local(&self) -> bool {
        matches!(
            self,
            SpiderError::PageUnavailable { .. } | SpiderError::ContentTooShort { .. }
        )
    }
}
