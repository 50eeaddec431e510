//! 页面读取能力 (Page Reader)
//!
//! 抽象一个有状态、可执行脚本的页面渲染会话。核心逻辑只依赖此接口，
//! 不感知具体渲染引擎 (Chromium / 静态解析)。

use std::time::Duration;

use async_trait::async_trait;

use crate::core::error::Result;

/// 标题读取失败时的占位符
pub const UNTITLED_CHAPTER: &str = "Untitled Chapter";

/// 页面中的链接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub href: String,
    pub text: String,
}

/// 会话工厂
///
/// 每次 `open` 分配一个独立的渲染上下文，调用方负责 `close`。
#[async_trait]
pub trait PageReader: Send + Sync {
    /// 后端名称 (用于日志)
    fn name(&self) -> &str;

    async fn open(&self) -> Result<Box<dyn PageSession>>;
}

/// 渲染会话
///
/// `goto` / `wait_for` 在超时或渲染失败时返回 `PageUnavailable`。
#[async_trait]
pub trait PageSession: Send {
    /// 导航到指定页面
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// 等待元素出现
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// 提取所有匹配元素的文本，无匹配时返回空序列
    async fn read_text(&mut self, selector: &str) -> Result<Vec<String>>;

    /// 提取匹配链接的 href 与文本
    async fn read_links(&mut self, selector: &str) -> Result<Vec<PageLink>>;

    /// 当前页面的渲染后源码
    async fn page_source(&mut self) -> Result<String>;

    /// 释放底层渲染资源
    async fn close(self: Box<Self>) -> Result<()>;

    /// 按顺序尝试标题标签，取第一个非空文本；永不失败
    async fn read_title(&mut self, tags: &[String]) -> String {
        for tag in tags {
            if let Ok(texts) = self.read_text(tag).await
                && let Some(title) = texts.iter().map(|t| t.trim()).find(|t| !t.is_empty())
            {
                return title.to_string();
            }
        }
        UNTITLED_CHAPTER.to_string()
    }
}
