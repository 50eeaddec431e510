//! 章节数推断 (Chapter Index Resolver)
//!
//! 目录页结构不可靠，按"先精确、后召回"的顺序串联多个独立策略，
//! 第一个通过合理性过滤的候选值胜出。

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::core::config::{BrowserConfig, SiteConfig};
use crate::core::error::{Result, SpiderError};
use crate::core::model::{DiscoveryResult, DiscoveryStrategy, TocTarget};
use crate::interfaces::{PageLink, PageSession, UNTITLED_CHAPTER};

static LABELED_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Content\s*\((\d+)\)").expect("static regex"));

static COUNT_PHRASES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        r"(?i)(\d+)\s*chapters?",
        r"(?i)chapters?\s*[:=]\s*(\d+)",
        r"(?i)total\s*[:=]?\s*(\d+)",
    ]
    .map(|p| Regex::new(p).expect("static regex"))
});

static CHAPTER_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*chapter\s+(\d+)").expect("static regex"));

const STRATEGY_ORDER: [DiscoveryStrategy; 4] = [
    DiscoveryStrategy::LabeledHeader,
    DiscoveryStrategy::CountPhrase,
    DiscoveryStrategy::ChapterLinks,
    DiscoveryStrategy::ListItems,
];

/// 目录页快照
///
/// 推断策略只依赖快照，与渲染引擎解耦。
#[derive(Debug, Clone, Default)]
pub struct TocSnapshot {
    /// 渲染后的页面源码
    pub source: String,
    /// 章节链接 (已按站点过滤前的原始集合)
    pub links: Vec<PageLink>,
    /// 列表项链接数量
    pub list_items: usize,
}

/// 目录推断器
pub struct ChapterIndexResolver<'a> {
    site: &'a SiteConfig,
}

impl<'a> ChapterIndexResolver<'a> {
    pub fn new(site: &'a SiteConfig) -> Self {
        Self { site }
    }

    /// 在会话中打开目录页并推断章节总数
    ///
    /// 返回推断结果以及目录页标题 (若可读)。
    pub async fn discover(
        &self,
        session: &mut dyn PageSession,
        target: &TocTarget,
        browser: &BrowserConfig,
    ) -> Result<(DiscoveryResult, Option<String>)> {
        let index_url = target.index_url();
        info!("正在获取章节数: {}", index_url);

        session.goto(&index_url).await?;
        session.wait_for("body", browser.toc_timeout()).await?;
        // 等待动态内容渲染
        tokio::time::sleep(browser.toc_settle()).await;

        let snapshot = TocSnapshot {
            source: session.page_source().await?,
            links: session.read_links(&self.site.chapter_link_selector).await?,
            list_items: session.read_text(&self.site.list_item_selector).await?.len(),
        };

        let result = self.resolve(&snapshot, target)?;
        info!("共发现 {} 个章节 (策略: {})", result.total, result.strategy);

        let title = session.read_title(&self.site.title_tags).await;
        let title = (title != UNTITLED_CHAPTER).then_some(title);

        Ok((result, title))
    }

    /// 依序执行各策略
    pub fn resolve(&self, snapshot: &TocSnapshot, target: &TocTarget) -> Result<DiscoveryResult> {
        STRATEGY_ORDER
            .into_iter()
            .find_map(|strategy| {
                let total = self.candidate(strategy, snapshot, target).filter(|n| *n >= 1)?;
                Some(DiscoveryResult { total, strategy })
            })
            .ok_or_else(|| {
                SpiderError::DiscoveryFailed(format!(
                    "no strategy matched on {}",
                    target.index_url()
                ))
            })
    }

    fn candidate(
        &self,
        strategy: DiscoveryStrategy,
        snapshot: &TocSnapshot,
        target: &TocTarget,
    ) -> Option<u32> {
        match strategy {
            DiscoveryStrategy::LabeledHeader => self.labeled_header(snapshot),
            DiscoveryStrategy::CountPhrase => self.count_phrase(snapshot),
            DiscoveryStrategy::ChapterLinks => self.chapter_links(snapshot, target),
            DiscoveryStrategy::ListItems => self.list_items(snapshot),
        }
    }

    /// 策略 1：`Content (N)` 计数标题
    fn labeled_header(&self, snapshot: &TocSnapshot) -> Option<u32> {
        let caps = LABELED_HEADER.captures(&snapshot.source)?;
        caps[1].parse().ok()
    }

    /// 策略 2：泛化计数文本
    ///
    /// 每个模式只看首个匹配，数值不在合理区间内则换下一个模式。
    fn count_phrase(&self, snapshot: &TocSnapshot) -> Option<u32> {
        let bounds = self.site.plausible_min..=self.site.plausible_max;

        COUNT_PHRASES.iter().find_map(|re| {
            let caps = re.captures(&snapshot.source)?;
            caps[1].parse::<u32>().ok().filter(|n| bounds.contains(n))
        })
    }

    /// 策略 3：同站章节链接中的最大章节号
    fn chapter_links(&self, snapshot: &TocSnapshot, target: &TocTarget) -> Option<u32> {
        snapshot
            .links
            .iter()
            .filter(|link| is_same_site(&link.href, target))
            .filter_map(|link| {
                let caps = CHAPTER_LABEL.captures(link.text.trim())?;
                caps[1].parse::<u32>().ok()
            })
            .max()
    }

    /// 策略 4：列表项计数，需高于最小值以排除导航栏
    fn list_items(&self, snapshot: &TocSnapshot) -> Option<u32> {
        if snapshot.list_items > self.site.min_list_items {
            debug!("列表项计数: {}", snapshot.list_items);
            u32::try_from(snapshot.list_items).ok()
        } else {
            None
        }
    }
}

/// 相对链接或与目录页同主机的绝对链接
fn is_same_site(href: &str, target: &TocTarget) -> bool {
    match Url::parse(href) {
        Ok(url) => url.host_str().is_some() && url.host_str() == target.host(),
        Err(_) => !href.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TocTarget {
        TocTarget::parse("https://example.test/s/index/Sample-Novel").unwrap()
    }

    fn link(href: &str, text: &str) -> PageLink {
        PageLink {
            href: href.into(),
            text: text.into(),
        }
    }

    fn resolve(snapshot: &TocSnapshot) -> Result<DiscoveryResult> {
        let site = SiteConfig::default();
        ChapterIndexResolver::new(&site).resolve(snapshot, &target())
    }

    #[test]
    fn labeled_header_wins_over_count_phrase() {
        let snapshot = TocSnapshot {
            source: "<h2>Content (321)</h2><span>45 chapters</span>".into(),
            ..Default::default()
        };
        let result = resolve(&snapshot).unwrap();
        assert_eq!(result.total, 321);
        assert_eq!(result.strategy, DiscoveryStrategy::LabeledHeader);
    }

    #[test]
    fn count_phrase_requires_plausible_bound() {
        let snapshot = TocSnapshot {
            source: "updated 3 chapters ago; Chapters: 250".into(),
            ..Default::default()
        };
        let result = resolve(&snapshot).unwrap();
        assert_eq!(result.total, 250);
        assert_eq!(result.strategy, DiscoveryStrategy::CountPhrase);
    }

    #[test]
    fn count_phrase_only_considers_first_match_per_pattern() {
        let snapshot = TocSnapshot {
            source: "updated 3 chapters ago, 250 chapters so far".into(),
            ..Default::default()
        };
        assert!(matches!(resolve(&snapshot), Err(SpiderError::DiscoveryFailed(_))));
    }

    #[test]
    fn out_of_bound_phrase_falls_through_to_links() {
        let snapshot = TocSnapshot {
            source: "total: 99999".into(),
            links: vec![
                link("/s/Sample-Novel/1", "Chapter 1 Opening"),
                link("https://example.test/s/Sample-Novel/12", "Chapter 12: Storm"),
                link("https://other.test/s/Else/900", "Chapter 900"),
                link("/s/Sample-Novel", "Table of contents"),
            ],
            list_items: 50,
        };
        let result = resolve(&snapshot).unwrap();
        assert_eq!(result.total, 12);
        assert_eq!(result.strategy, DiscoveryStrategy::ChapterLinks);
    }

    #[test]
    fn list_items_need_more_than_minimum() {
        let few = TocSnapshot {
            list_items: 10,
            ..Default::default()
        };
        assert!(matches!(resolve(&few), Err(SpiderError::DiscoveryFailed(_))));

        let many = TocSnapshot {
            list_items: 11,
            ..Default::default()
        };
        let result = resolve(&many).unwrap();
        assert_eq!(result.total, 11);
        assert_eq!(result.strategy, DiscoveryStrategy::ListItems);
    }

    #[test]
    fn zero_candidates_are_rejected() {
        let snapshot = TocSnapshot {
            source: "Content (0)".into(),
            ..Default::default()
        };
        assert!(matches!(resolve(&snapshot), Err(SpiderError::DiscoveryFailed(_))));
    }

    #[test]
    fn same_site_filter() {
        let t = target();
        assert!(is_same_site("/s/Sample-Novel/3", &t));
        assert!(is_same_site("https://example.test/s/Sample-Novel/3", &t));
        assert!(!is_same_site("https://elsewhere.test/s/Sample-Novel/3", &t));
        assert!(!is_same_site("", &t));
    }
}
