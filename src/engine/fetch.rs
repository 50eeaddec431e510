//! 章节抓取循环 (Fetch Loop)
//!
//! 顺序处理一段连续的章节编号：已落盘则跳过，单章失败只写旁路错误记录并继续。
//! 取消令牌只在章节边界处检查，循环本身不修改任务状态。

use std::ops::RangeInclusive;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{AppConfig, ScraperConfig, SiteConfig};
use crate::core::error::{Result, SpiderError};
use crate::core::model::{ChapterArtifact, ChapterLocator, NovelDir, TocTarget};
use crate::interfaces::PageSession;
use crate::utils::{file_exists, remove_file_if_exists, save_file};

/// 单章处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    Saved { title: String },
    /// 产物已存在
    Skipped,
    Failed { error: String },
}

/// 进度回调
pub trait ProgressSink: Send + Sync {
    /// `processed` 为本次循环已处理的章节数 (含跳过与失败)
    fn report(&self, index: u32, processed: u32, outcome: &ChapterOutcome);
}

/// 循环汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// 成功数，包含跳过的章节
    pub succeeded: u32,
    pub skipped: u32,
    pub failed: u32,
    /// 是否因取消而提前结束
    pub cancelled: bool,
}

impl FetchSummary {
    pub fn processed(&self) -> u32 {
        self.succeeded + self.failed
    }
}

pub struct FetchLoop<'a> {
    site: &'a SiteConfig,
    scraper: &'a ScraperConfig,
    page_timeout: Duration,
    settle: Duration,
    cancel: CancellationToken,
}

impl<'a> FetchLoop<'a> {
    pub fn new(config: &'a AppConfig, cancel: CancellationToken) -> Self {
        Self {
            site: &config.site,
            scraper: &config.scraper,
            page_timeout: config.browser.page_timeout(),
            settle: config.browser.settle(),
            cancel,
        }
    }

    /// 执行抓取
    ///
    /// 仅在输出目录无法创建时返回错误。
    pub async fn run(
        &self,
        session: &mut dyn PageSession,
        target: &TocTarget,
        indices: RangeInclusive<u32>,
        dir: &NovelDir,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSummary> {
        tokio::fs::create_dir_all(dir.path()).await?;

        let end = *indices.end();
        let mut summary = FetchSummary::default();

        for index in indices {
            if self.cancel.is_cancelled() {
                info!("任务已取消，停止于第 {} 章之前", index);
                summary.cancelled = true;
                break;
            }

            let path = dir.chapter_path(index);
            if file_exists(&path).await {
                debug!("跳过已存在章节: {}", index);
                summary.succeeded += 1;
                summary.skipped += 1;
                sink.report(index, summary.processed(), &ChapterOutcome::Skipped);
                continue;
            }

            let locator = target.chapter(index);
            let outcome = match self.fetch_with_retry(session, &locator).await {
                Ok(artifact) => match save_file(&path, artifact.render().as_bytes()).await {
                    Ok(()) => {
                        remove_file_if_exists(dir.error_path(index)).await;
                        info!("[{}/{}] {}", index, end, artifact.title);
                        ChapterOutcome::Saved {
                            title: artifact.title,
                        }
                    }
                    Err(e) => self.record_failure(dir, &locator, &e.into()).await,
                },
                Err(e) => self.record_failure(dir, &locator, &e).await,
            };

            if matches!(outcome, ChapterOutcome::Failed { .. }) {
                summary.failed += 1;
            } else {
                summary.succeeded += 1;
            }
            sink.report(index, summary.processed(), &outcome);

            self.pause().await;
        }

        info!(
            "抓取结束: 成功 {} (跳过 {}) | 失败 {}",
            summary.succeeded, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    async fn fetch_with_retry(
        &self,
        session: &mut dyn PageSession,
        locator: &ChapterLocator,
    ) -> Result<ChapterArtifact> {
        let max_attempts = self.scraper.max_retries + 1;
        let mut attempt = 1;

        loop {
            match self.fetch_chapter(session, locator).await {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.is_chapter_local()
                    && attempt < max_attempts
                    && !self.cancel.is_cancelled() =>
                {
                    debug!(
                        "第 {} 章失败 (第 {}/{} 次): {}",
                        locator.index, attempt, max_attempts, e
                    );
                    attempt += 1;
                    self.pause().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 导航、等待正文容器、提取并校验
    async fn fetch_chapter(
        &self,
        session: &mut dyn PageSession,
        locator: &ChapterLocator,
    ) -> Result<ChapterArtifact> {
        session.goto(&locator.url).await?;
        session
            .wait_for(&self.site.content_selector, self.page_timeout)
            .await?;

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let title = session.read_title(&self.site.title_tags).await;

        let paragraph_selector = format!(
            "{} {}",
            self.site.content_selector, self.site.paragraph_selector
        );
        let paragraphs = session.read_text(&paragraph_selector).await?;

        let body = if paragraphs.is_empty() {
            session
                .read_text(&self.site.content_selector)
                .await?
                .into_iter()
                .next()
                .map(|t| t.trim().to_string())
                .unwrap_or_default()
        } else {
            paragraphs
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let len = body.chars().count();
        if len < self.scraper.min_content_length {
            return Err(SpiderError::ContentTooShort {
                len,
                min: self.scraper.min_content_length,
            });
        }

        Ok(ChapterArtifact { title, body })
    }

    /// 写入旁路错误记录
    async fn record_failure(
        &self,
        dir: &NovelDir,
        locator: &ChapterLocator,
        error: &SpiderError,
    ) -> ChapterOutcome {
        warn!("第 {} 章失败: {}", locator.index, error);

        let record = format!(
            "Chapter {}\nURL: {}\nError: {}\n",
            locator.index, locator.url, error
        );
        if let Err(e) = save_file(dir.error_path(locator.index), record.as_bytes()).await {
            warn!("写入错误记录失败 (第 {} 章): {}", locator.index, e);
        }

        ChapterOutcome::Failed {
            error: error.to_string(),
        }
    }

    /// 固定间隔，取消时立即返回
    async fn pause(&self) {
        let delay = self.scraper.chapter_delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
