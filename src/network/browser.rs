//! 浏览器读取后端 (Chromium Reader)
//!
//! 基于 chromiumoxide 的 PageReader 实现。每个会话独占一个浏览器进程，
//! 关闭时等待事件循环结束，确保渲染进程不泄漏。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig as CdpConfig},
    cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams,
};
use futures::StreamExt;
use tokio::{
    sync::OnceCell,
    task::JoinHandle,
    time::{interval, timeout},
};
use tracing::debug;

use crate::core::config::AppConfig;
use crate::core::error::{Result, SpiderError};
use crate::interfaces::{PageLink, PageReader, PageSession};

/// 屏蔽自动化特征的注入脚本
static STEALTH_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

static UA_CACHE: OnceCell<String> = OnceCell::const_new();

/// 元素轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 浏览器会话
/// 采用显式的所有权管理，确保关闭逻辑的确定性
pub struct BrowserSession {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
}

impl BrowserSession {
    /// 启动浏览器会话
    pub async fn launch(config: &AppConfig) -> Result<Self> {
        let ua = UA_CACHE.get_or_init(Self::probe_native_ua).await;
        let browser_config = build_browser_config(config, ua)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))?;

        // 启动事件循环
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler: Some(handle),
        })
    }

    /// 创建新页面
    pub async fn new_page(&self) -> Result<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| SpiderError::Browser("Browser already closed".into()))?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))?;

        if let Err(e) = page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                STEALTH_JS.to_string(),
            ))
            .await
        {
            debug!("Stealth injection warning: {}", e);
        }

        Ok(page)
    }

    /// 优雅关闭浏览器，并等待事件循环结束
    pub async fn close(&mut self) -> Result<()> {
        let browser = self.browser.take();
        let handler = self.handler.take();

        if let Some(mut b) = browser {
            let _ = b.close().await;
            if let Some(h) = handler {
                let _ = h.await;
            }
        }
        Ok(())
    }

    async fn probe_native_ua() -> String {
        debug!("正在探测系统原生 User-Agent...");

        let config = match CdpConfig::builder()
            .arg("--headless=new")
            .arg("--no-sandbox")
            .build()
        {
            Ok(c) => c,
            Err(_) => return Self::fallback_ua(),
        };

        let (mut browser, mut handler) = match Browser::launch(config).await {
            Ok(b) => b,
            Err(_) => return Self::fallback_ua(),
        };

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let result = async {
            let page = browser.new_page("about:blank").await?;
            let ua: String = page.evaluate("navigator.userAgent").await?.into_value()?;
            Ok::<String, chromiumoxide::error::CdpError>(ua)
        }
        .await;

        let _ = browser.close().await;
        let _ = handle.await;

        match result {
            Ok(ua) => {
                let clean_ua = ua
                    .replace("HeadlessChrome", "Chrome")
                    .replace("Headless", "");
                debug!("UA 探测成功: {}", clean_ua);
                clean_ua
            }
            Err(_) => Self::fallback_ua(),
        }
    }

    fn fallback_ua() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36".to_string()
    }
}

/// 构建浏览器配置
fn build_browser_config(config: &AppConfig, ua: &str) -> Result<CdpConfig> {
    let mut builder = CdpConfig::builder()
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua))
        .arg("--disable-infobars")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg(format!("--window-size={}", config.browser.window_size))
        .arg("--disable-extensions");

    if config.browser.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }

    let chrome_path = if let Some(path) = &config.browser.chrome_path {
        Some(path.clone())
    } else {
        [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
    };

    if let Some(path) = chrome_path {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(SpiderError::Browser)
}

// 未显式关闭时在后台兜底回收
impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let handler = self.handler.take();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    let _ = browser.close().await;
                    if let Some(h) = handler {
                        let _ = h.await;
                    }
                });
            }
        }
    }
}

// =============================================================================
// ChromiumReader
// =============================================================================

/// 基于真实浏览器的页面读取器
pub struct ChromiumReader {
    config: Arc<AppConfig>,
}

impl ChromiumReader {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageReader for ChromiumReader {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn open(&self) -> Result<Box<dyn PageSession>> {
        let mut browser = BrowserSession::launch(&self.config).await?;
        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                return Err(e);
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            nav_timeout: self.config.browser.page_timeout(),
            current_url: String::new(),
        }))
    }
}

/// 单个浏览器会话 + 页面
pub struct ChromiumSession {
    browser: BrowserSession,
    page: Page,
    nav_timeout: Duration,
    current_url: String,
}

impl ChromiumSession {
    fn unavailable(&self, reason: impl std::fmt::Display) -> SpiderError {
        SpiderError::page_unavailable(self.current_url.clone(), reason)
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.current_url = url.to_string();
        debug!("浏览器访问 URL: {}", url);

        match timeout(self.nav_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.unavailable(e)),
            Err(_) => Err(self.unavailable("navigation timed out")),
        }
    }

    async fn wait_for(&mut self, selector: &str, wait: Duration) -> Result<()> {
        let page = &self.page;
        let found = timeout(wait, async {
            let mut ticker = interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if let Ok(elements) = page.find_elements(selector).await
                    && !elements.is_empty()
                {
                    return;
                }
            }
        })
        .await;

        found.map_err(|_| self.unavailable(format!("timed out waiting for {}", selector)))
    }

    async fn read_text(&mut self, selector: &str) -> Result<Vec<String>> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            // 无匹配元素时 CDP 可能返回错误
            Err(e) => {
                debug!("查找元素失败 ({}): {}", selector, e);
                return Ok(Vec::new());
            }
        };

        let mut texts = Vec::with_capacity(elements.len());
        for el in elements {
            let text = el
                .inner_text()
                .await
                .map_err(|e| SpiderError::Browser(e.to_string()))?
                .unwrap_or_default();
            texts.push(text);
        }
        Ok(texts)
    }

    async fn read_links(&mut self, selector: &str) -> Result<Vec<PageLink>> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            Err(_) => return Ok(Vec::new()),
        };

        let mut links = Vec::with_capacity(elements.len());
        for el in elements {
            let href = el
                .attribute("href")
                .await
                .map_err(|e| SpiderError::Browser(e.to_string()))?
                .unwrap_or_default();
            let text = el
                .inner_text()
                .await
                .map_err(|e| SpiderError::Browser(e.to_string()))?
                .unwrap_or_default();
            links.push(PageLink { href, text });
        }
        Ok(links)
    }

    async fn page_source(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| SpiderError::Browser(e.to_string()))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        debug!("关闭浏览器会话");
        self.browser.close().await
    }
}
