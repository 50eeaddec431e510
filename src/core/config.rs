//! 配置管理系统 (Configuration Management)
//!
//! 负责 `config.toml` 的反序列化及其层级结构映射，支持环境变量 (`SPIDER__*`) 覆盖与默认值回退机制。

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use config::{Config, Environment, File};
use serde::Deserialize;
use strum::Display;

use crate::core::error::{Result, SpiderError};

/// 全局应用配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct AppConfig {
    /// 章节产物输出根目录
    #[serde(default = "default_output_path")]
    #[builder(default = default_output_path(), into)]
    pub output_path: String,

    /// 自动化浏览器 (Chromium) 相关配置
    #[serde(default)]
    #[builder(default)]
    pub browser: BrowserConfig,

    /// 抓取循环与任务调度参数
    #[serde(default)]
    #[builder(default)]
    pub scraper: ScraperConfig,

    /// 站点页面结构 (选择器与推断阈值)
    #[serde(default)]
    #[builder(default)]
    pub site: SiteConfig,
}

/// 浏览器引擎配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct BrowserConfig {
    /// 是否以无头模式 (Headless) 运行
    #[serde(default = "default_headless")]
    #[builder(default = true)]
    pub headless: bool,
    /// 自定义可执行文件路径
    pub chrome_path: Option<String>,
    #[serde(default = "default_window_size")]
    #[builder(default = default_window_size(), into)]
    pub window_size: String,
    /// 章节页正文容器等待上限 (秒)
    #[serde(default = "default_page_timeout")]
    #[builder(default = default_page_timeout())]
    pub page_timeout_secs: u64,
    /// 目录页等待上限 (秒)
    #[serde(default = "default_toc_timeout")]
    #[builder(default = default_toc_timeout())]
    pub toc_timeout_secs: u64,
    /// 章节正文出现后等待动态内容稳定的时间 (毫秒)
    #[serde(default = "default_settle_ms")]
    #[builder(default = default_settle_ms())]
    pub settle_ms: u64,
    /// 目录页加载后的渲染等待 (毫秒)
    #[serde(default = "default_toc_settle_ms")]
    #[builder(default = default_toc_settle_ms())]
    pub toc_settle_ms: u64,
}

/// 页面读取后端
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReaderKind {
    /// 通过 CDP 驱动的真实浏览器
    #[default]
    Chromium,
    /// 纯 HTTP 拉取 + 静态解析，不执行脚本
    Static,
}

/// 抓取参数
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct ScraperConfig {
    #[serde(default)]
    #[builder(default)]
    pub reader: ReaderKind,
    /// 正文最小字符数
    #[serde(default = "default_min_content_length")]
    #[builder(default = default_min_content_length())]
    pub min_content_length: usize,
    /// 单章失败后的重试次数
    #[serde(default)]
    #[builder(default)]
    pub max_retries: u32,
    /// 章节之间的固定间隔 (毫秒)
    #[serde(default = "default_chapter_delay")]
    #[builder(default = default_chapter_delay())]
    pub chapter_delay_ms: u64,
    /// 同时运行的任务上限，未设置则不限制
    pub max_concurrent_jobs: Option<usize>,
}

/// 站点结构配置
#[derive(Debug, Deserialize, Builder, Clone)]
pub struct SiteConfig {
    /// 正文容器
    #[serde(default = "default_content_selector")]
    #[builder(default = default_content_selector(), into)]
    pub content_selector: String,
    #[serde(default = "default_paragraph_selector")]
    #[builder(default = default_paragraph_selector(), into)]
    pub paragraph_selector: String,
    /// 章节标题候选标签，按顺序尝试
    #[serde(default = "default_title_tags")]
    #[builder(default = default_title_tags())]
    pub title_tags: Vec<String>,
    /// 目录页上的章节链接
    #[serde(default = "default_chapter_link_selector")]
    #[builder(default = default_chapter_link_selector(), into)]
    pub chapter_link_selector: String,
    /// 目录页上的列表项链接
    #[serde(default = "default_list_item_selector")]
    #[builder(default = default_list_item_selector(), into)]
    pub list_item_selector: String,
    /// 列表项计数策略的最小接受值 (不含)
    #[serde(default = "default_min_list_items")]
    #[builder(default = default_min_list_items())]
    pub min_list_items: usize,
    /// 泛化文本匹配策略的合理区间
    #[serde(default = "default_plausible_min")]
    #[builder(default = default_plausible_min())]
    pub plausible_min: u32,
    #[serde(default = "default_plausible_max")]
    #[builder(default = default_plausible_max())]
    pub plausible_max: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_output_path() -> String {
    "data/output".to_string()
}
fn default_headless() -> bool {
    true
}
fn default_window_size() -> String {
    "1920,1080".to_string()
}
fn default_page_timeout() -> u64 {
    15
}
fn default_toc_timeout() -> u64 {
    20
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_toc_settle_ms() -> u64 {
    3000
}
fn default_min_content_length() -> usize {
    100
}
fn default_chapter_delay() -> u64 {
    2000
}
fn default_content_selector() -> String {
    "#showReading".to_string()
}
fn default_paragraph_selector() -> String {
    "p".to_string()
}
fn default_title_tags() -> Vec<String> {
    vec!["h1".to_string(), "h2".to_string()]
}
fn default_chapter_link_selector() -> String {
    "a[href*='/s/']".to_string()
}
fn default_list_item_selector() -> String {
    "li a, .chapter-list a, .chapters a".to_string()
}
fn default_min_list_items() -> usize {
    10
}
fn default_plausible_min() -> u32 {
    10
}
fn default_plausible_max() -> u32 {
    10000
}

impl AppConfig {
    /// 从文件系统与环境变量中加载并解析配置
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let builder = Config::builder();

        let builder = if config_path.exists() {
            builder.add_source(File::from(config_path))
        } else {
            builder
        };

        let settings = builder
            .add_source(Environment::with_prefix("SPIDER").separator("__"))
            .build()
            .map_err(SpiderError::Config)?;
        settings.try_deserialize().map_err(SpiderError::Config)
    }

    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.output_path)
    }
}

impl BrowserConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn toc_timeout(&self) -> Duration {
        Duration::from_secs(self.toc_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn toc_settle(&self) -> Duration {
        Duration::from_millis(self.toc_settle_ms)
    }
}

impl ScraperConfig {
    pub fn chapter_delay(&self) -> Duration {
        Duration::from_millis(self.chapter_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load_from(Path::new("definitely-not-here.toml")).unwrap();
        assert_eq!(cfg.output_path, "data/output");
        assert!(cfg.browser.headless);
        assert_eq!(cfg.browser.settle(), Duration::from_millis(2000));
        assert_eq!(cfg.browser.toc_settle(), Duration::from_millis(3000));
        assert_eq!(cfg.scraper.reader, ReaderKind::Chromium);
        assert_eq!(cfg.scraper.min_content_length, 100);
        assert_eq!(cfg.scraper.max_retries, 0);
        assert_eq!(cfg.site.content_selector, "#showReading");
        assert_eq!(cfg.site.title_tags, vec!["h1", "h2"]);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
output_path = "out"

[scraper]
reader = "static"
chapter_delay_ms = 0
max_concurrent_jobs = 2

[browser]
toc_settle_ms = 500

[site]
plausible_max = 500
"#
        )
        .unwrap();

        let cfg = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.output_path, "out");
        assert_eq!(cfg.scraper.reader, ReaderKind::Static);
        assert_eq!(cfg.scraper.chapter_delay(), Duration::ZERO);
        assert_eq!(cfg.scraper.max_concurrent_jobs, Some(2));
        assert_eq!(cfg.browser.toc_settle_ms, 500);
        assert_eq!(cfg.browser.settle_ms, 2000);
        assert_eq!(cfg.site.plausible_max, 500);
        assert_eq!(cfg.site.plausible_min, 10);
    }
}
