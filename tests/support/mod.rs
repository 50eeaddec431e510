#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use chapter_spider::core::config::{AppConfig, BrowserConfig, ScraperConfig};
use chapter_spider::core::error::{Result, SpiderError};
use chapter_spider::interfaces::{PageLink, PageReader, PageSession};

pub const TOC_URL: &str = "https://novel.test/s/index/Sample-Novel";

/// 足以通过最小长度校验的正文段落
pub fn long_paragraph(index: u32) -> String {
    format!("Paragraph of chapter {} ", index).repeat(8)
}

/// 测试配置：无等待、无间隔，输出到临时目录
pub fn test_config(output_root: &Path) -> AppConfig {
    AppConfig::builder()
        .output_path(output_root.display().to_string())
        .browser(BrowserConfig::builder().settle_ms(0).toc_settle_ms(0).build())
        .scraper(ScraperConfig::builder().chapter_delay_ms(0).build())
        .build()
}

#[derive(Debug, Clone)]
pub struct FakeChapter {
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
}

impl FakeChapter {
    pub fn ok(index: u32) -> Self {
        Self {
            title: Some(format!("Chapter {}: Part {}", index, index)),
            paragraphs: vec![long_paragraph(index), String::new(), long_paragraph(index)],
        }
    }

    pub fn short(index: u32) -> Self {
        Self {
            title: Some(format!("Chapter {}", index)),
            paragraphs: vec!["too short".into()],
        }
    }
}

/// 在指定章节导航时暂停，直到测试放行
#[derive(Clone)]
pub struct Gate {
    pub index: u32,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    pub fn at(index: u32) -> Self {
        Self {
            index,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct Script {
    toc_source: Option<String>,
    toc_title: Option<String>,
    chapters: HashMap<u32, FakeChapter>,
    gate: Option<Gate>,
    fail_open: bool,
    panic_at: Option<u32>,
}

/// 脚本化的页面读取器，记录会话开闭与访问历史
#[derive(Clone, Default)]
pub struct ScriptedReader {
    script: Arc<Mutex<Script>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    visited: Arc<Mutex<Vec<String>>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 章节 `range` 全部可正常抓取
    pub fn with_chapters(self, range: std::ops::RangeInclusive<u32>) -> Self {
        {
            let mut script = self.script.lock();
            for i in range {
                script.chapters.insert(i, FakeChapter::ok(i));
            }
        }
        self
    }

    pub fn with_chapter(self, index: u32, chapter: FakeChapter) -> Self {
        self.script.lock().chapters.insert(index, chapter);
        self
    }

    pub fn with_toc(self, source: impl Into<String>, title: Option<&str>) -> Self {
        {
            let mut script = self.script.lock();
            script.toc_source = Some(source.into());
            script.toc_title = title.map(str::to_string);
        }
        self
    }

    pub fn with_gate(self, gate: Gate) -> Self {
        self.script.lock().gate = Some(gate);
        self
    }

    /// 导航到指定章节时 panic
    pub fn panicking_at(self, index: u32) -> Self {
        self.script.lock().panic_at = Some(index);
        self
    }

    pub fn failing_open(self) -> Self {
        self.script.lock().fail_open = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }

    /// 被访问过的章节编号
    pub fn visited_chapters(&self) -> Vec<u32> {
        self.visited()
            .iter()
            .filter(|url| !url.contains("/s/index/"))
            .filter_map(|url| url.rsplit('/').next()?.parse().ok())
            .collect()
    }

    pub fn into_reader(self) -> Arc<dyn PageReader> {
        Arc::new(self)
    }
}

#[async_trait]
impl PageReader for ScriptedReader {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self) -> Result<Box<dyn PageSession>> {
        if self.script.lock().fail_open {
            return Err(SpiderError::Browser("launch refused".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            reader: self.clone(),
            page: Page::Blank,
        }))
    }
}

enum Page {
    Blank,
    Toc,
    Chapter(u32),
    Missing(String),
}

struct ScriptedSession {
    reader: ScriptedReader,
    page: Page,
}

#[async_trait]
impl PageSession for ScriptedSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.reader.visited.lock().push(url.to_string());

        if url.contains("/s/index/") {
            self.page = Page::Toc;
            return Ok(());
        }

        let index: Option<u32> = url.rsplit('/').next().and_then(|s| s.parse().ok());
        let (gate, panic_at) = {
            let script = self.reader.script.lock();
            (script.gate.clone(), script.panic_at)
        };
        if index.is_some() && index == panic_at {
            panic!("scripted session fault at {}", url);
        }
        if let (Some(gate), Some(index)) = (gate, index)
            && gate.index == index
        {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let exists = index.is_some_and(|i| self.reader.script.lock().chapters.contains_key(&i));
        self.page = match index {
            Some(i) if exists => Page::Chapter(i),
            _ => Page::Missing(url.to_string()),
        };
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        match &self.page {
            Page::Missing(url) => Err(SpiderError::page_unavailable(
                url.clone(),
                format!("timed out waiting for {}", selector),
            )),
            Page::Blank => Err(SpiderError::page_unavailable("about:blank", "no page")),
            _ => Ok(()),
        }
    }

    async fn read_text(&mut self, selector: &str) -> Result<Vec<String>> {
        let script = self.reader.script.lock();
        match &self.page {
            Page::Chapter(i) => {
                let chapter = &script.chapters[i];
                Ok(match selector {
                    "h1" => chapter.title.clone().into_iter().collect(),
                    "#showReading p" => chapter.paragraphs.clone(),
                    "#showReading" => vec![chapter.paragraphs.join("\n")],
                    _ => Vec::new(),
                })
            }
            Page::Toc => Ok(match selector {
                "h1" => script.toc_title.clone().into_iter().collect(),
                _ => Vec::new(),
            }),
            _ => Ok(Vec::new()),
        }
    }

    async fn read_links(&mut self, _selector: &str) -> Result<Vec<PageLink>> {
        Ok(Vec::new())
    }

    async fn page_source(&mut self) -> Result<String> {
        match &self.page {
            Page::Toc => Ok(self.reader.script.lock().toc_source.clone().unwrap_or_default()),
            _ => Ok(String::new()),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.reader.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
