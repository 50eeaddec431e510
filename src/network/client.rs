//! 静态页面读取后端 (Static Reader)
//!
//! 不执行脚本，直接拉取 HTML 并用 `scraper` 解析。适用于服务端渲染的站点。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use tracing::debug;

use crate::core::config::AppConfig;
use crate::core::error::{Result, SpiderError};
use crate::interfaces::{PageLink, PageReader, PageSession};

const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

/// 基于 HTTP 的页面读取器
pub struct StaticReader {
    client: reqwest::Client,
}

impl StaticReader {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.browser.page_timeout())
            .build()
            .map_err(SpiderError::Network)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageReader for StaticReader {
    fn name(&self) -> &str {
        "static"
    }

    async fn open(&self) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(StaticSession {
            client: self.client.clone(),
            current_url: String::new(),
            html: String::new(),
        }))
    }
}

/// 静态会话，仅保存最近一次拉取的文档
pub struct StaticSession {
    client: reqwest::Client,
    current_url: String,
    html: String,
}

impl StaticSession {
    fn selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector)
            .map_err(|e| SpiderError::Parse(format!("invalid selector {:?}: {}", selector, e)))
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl PageSession for StaticSession {
    async fn goto(&mut self, url: &str) -> Result<()> {
        debug!("HTTP 拉取: {}", url);
        self.current_url = url.to_string();
        self.html.clear();

        self.html = self
            .fetch(url)
            .await
            .map_err(|e| SpiderError::page_unavailable(url, e))?;
        Ok(())
    }

    /// 静态文档不会变化，匹配即就绪
    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        let sel = Self::selector(selector)?;
        if Html::parse_document(&self.html).select(&sel).next().is_some() {
            Ok(())
        } else {
            Err(SpiderError::page_unavailable(
                self.current_url.clone(),
                format!("element not found: {}", selector),
            ))
        }
    }

    async fn read_text(&mut self, selector: &str) -> Result<Vec<String>> {
        let sel = Self::selector(selector)?;
        let doc = Html::parse_document(&self.html);
        Ok(doc
            .select(&sel)
            .map(|el| el.text().collect::<String>())
            .collect())
    }

    async fn read_links(&mut self, selector: &str) -> Result<Vec<PageLink>> {
        let sel = Self::selector(selector)?;
        let doc = Html::parse_document(&self.html);
        Ok(doc
            .select(&sel)
            .map(|el| PageLink {
                href: el.value().attr("href").unwrap_or_default().to_string(),
                text: el.text().collect::<String>(),
            })
            .collect())
    }

    async fn page_source(&mut self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(html: &str) -> StaticSession {
        StaticSession {
            client: reqwest::Client::new(),
            current_url: "https://a.test/s/x/1".into(),
            html: html.into(),
        }
    }

    const PAGE: &str = r#"
        <html><body>
          <h1>  Chapter 1: Start  </h1>
          <div id="showReading"><p>First.</p><p></p><p>Second.</p></div>
          <ul><li><a href="/s/x/1">Chapter 1</a></li><li><a href="/s/x/2">Chapter 2</a></li></ul>
        </body></html>"#;

    #[tokio::test]
    async fn reads_text_links_and_title() {
        let mut s = session(PAGE);
        assert_eq!(
            s.read_text("#showReading p").await.unwrap(),
            vec!["First.", "", "Second."]
        );
        let links = s.read_links("li a").await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[1].href, "/s/x/2");
        assert_eq!(links[1].text, "Chapter 2");
        let tags = vec!["h1".to_string(), "h2".to_string()];
        assert_eq!(s.read_title(&tags).await, "Chapter 1: Start");
    }

    #[tokio::test]
    async fn wait_for_reports_missing_element_as_unavailable() {
        let mut s = session(PAGE);
        assert!(s.wait_for("#showReading", Duration::from_secs(1)).await.is_ok());
        let err = s.wait_for("#missing", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SpiderError::PageUnavailable { .. }));
    }

    #[tokio::test]
    async fn title_falls_back_to_placeholder() {
        let mut s = session("<html><body><p>no headings</p></body></html>");
        let tags = vec!["h1".to_string()];
        assert_eq!(s.read_title(&tags).await, crate::interfaces::UNTITLED_CHAPTER);
    }
}
