use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use strum::Display;
use url::Url;

use crate::core::error::{Result, SpiderError};

/// 章节分隔线宽度
pub const SEPARATOR_WIDTH: usize = 60;

static CHAPTER_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Chapter_(\d+)\.txt$").expect("static regex"));

/// 解析后的目录标识 (TOC identifier)
///
/// 支持以下形式：
/// - `<base>/s/index/<slug>`
/// - `<base>/s/<slug>`
/// - `<base>/s/<slug>/<n>` (章节链接，末尾数字被忽略)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocTarget {
    base: String,
    slug: String,
    host: Option<String>,
}

impl TocTarget {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let url = Url::parse(input)
            .map_err(|e| SpiderError::Parse(format!("invalid TOC url {:?}: {}", input, e)))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(SpiderError::Parse(format!(
                "unsupported TOC url {:?}: expected http(s) with a host",
                input
            )));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let marker = segments.iter().position(|seg| *seg == "s").ok_or_else(|| {
            SpiderError::Parse(format!("invalid TOC url {:?}: expected a /s/ path", input))
        })?;

        let mut rest = &segments[marker + 1..];
        if rest.first() == Some(&"index") {
            rest = &rest[1..];
        }
        if let Some(last) = rest.last()
            && rest.len() > 1
            && last.chars().all(|c| c.is_ascii_digit())
        {
            rest = &rest[..rest.len() - 1];
        }

        let slug = match rest {
            [slug] => slug.to_string(),
            [] => {
                return Err(SpiderError::Parse(format!(
                    "invalid TOC url {:?}: missing novel slug",
                    input
                )));
            }
            _ => {
                return Err(SpiderError::Parse(format!(
                    "invalid TOC url {:?}: unexpected path after slug",
                    input
                )));
            }
        };

        let mut base = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            base.push_str(&format!(":{}", port));
        }
        for seg in &segments[..marker] {
            base.push('/');
            base.push_str(seg);
        }

        Ok(Self {
            base,
            slug,
            host: url.host_str().map(str::to_string),
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// 目录页地址
    pub fn index_url(&self) -> String {
        format!("{}/s/index/{}", self.base, self.slug)
    }

    pub fn chapter(&self, index: u32) -> ChapterLocator {
        ChapterLocator {
            slug: self.slug.clone(),
            index,
            url: format!("{}/s/{}/{}", self.base, self.slug, index),
        }
    }

    /// 文件系统安全的目录名
    pub fn dir_name(&self) -> String {
        sanitize_dir_name(&self.slug)
    }

    /// 由 slug 推导的可读书名 (`sample-novel` -> `Sample Novel`)
    pub fn display_title(&self) -> String {
        self.slug
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

/// 章节定位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLocator {
    pub slug: String,
    pub index: u32,
    pub url: String,
}

/// 章节产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterArtifact {
    pub title: String,
    pub body: String,
}

impl ChapterArtifact {
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n\n{}",
            self.title,
            "=".repeat(SEPARATOR_WIDTH),
            self.body
        )
    }
}

/// 单本书的输出目录
#[derive(Debug, Clone)]
pub struct NovelDir {
    root: PathBuf,
}

impl NovelDir {
    pub fn new(output_root: impl AsRef<Path>, target: &TocTarget) -> Self {
        Self {
            root: output_root.as_ref().join(target.dir_name()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn chapter_path(&self, index: u32) -> PathBuf {
        self.root.join(format!("Chapter_{:04}.txt", index))
    }

    pub fn error_path(&self, index: u32) -> PathBuf {
        self.root.join(format!("_error_chapter_{}.txt", index))
    }

    /// 扫描已落盘的章节编号
    pub async fn scan_existing(&self) -> Result<BTreeSet<u32>> {
        let mut found = BTreeSet::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(parse_chapter_file_name) {
                found.insert(index);
            }
        }
        Ok(found)
    }
}

fn parse_chapter_file_name(name: &str) -> Option<u32> {
    CHAPTER_FILE
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}

fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | '<' | '>' | ':' | '"' | '|'))
        .collect()
}

/// 章节数推断策略，按精确度排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// `Content (N)` 形式的计数标题
    LabeledHeader,
    /// `N chapters` / `chapters: N` / `total: N` 等泛化文本
    CountPhrase,
    /// 章节链接文本中的最大章节号
    ChapterLinks,
    /// 章节列表项计数
    ListItems,
}

/// 章节数推断结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub total: u32,
    pub strategy: DiscoveryStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_url() {
        let t = TocTarget::parse("https://novelhi.com/s/index/Test-Novel").unwrap();
        assert_eq!(t.slug(), "Test-Novel");
        assert_eq!(t.index_url(), "https://novelhi.com/s/index/Test-Novel");
        assert_eq!(t.chapter(1).url, "https://novelhi.com/s/Test-Novel/1");
        assert_eq!(t.chapter(3).url, "https://novelhi.com/s/Test-Novel/3");
    }

    #[test]
    fn parses_short_and_chapter_urls() {
        let short = TocTarget::parse("https://novelhi.com/s/Test-Novel/").unwrap();
        let chapter = TocTarget::parse("https://novelhi.com/s/Test-Novel/123").unwrap();
        assert_eq!(short, chapter);
        assert_eq!(chapter.slug(), "Test-Novel");
    }

    #[test]
    fn keeps_port_and_path_prefix() {
        let t = TocTarget::parse("http://127.0.0.1:8080/mirror/s/index/Abc").unwrap();
        assert_eq!(t.index_url(), "http://127.0.0.1:8080/mirror/s/index/Abc");
        assert_eq!(t.chapter(7).url, "http://127.0.0.1:8080/mirror/s/Abc/7");
        assert_eq!(t.host(), Some("127.0.0.1"));
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for bad in [
            "invalid-url",
            "ftp://novelhi.com/s/index/X",
            "https://novelhi.com/book/X",
            "https://novelhi.com/s/index/",
            "https://novelhi.com/s/a/b/c",
        ] {
            assert!(
                matches!(TocTarget::parse(bad), Err(SpiderError::Parse(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn artifact_layout_is_zero_padded() {
        let t = TocTarget::parse("https://example.test/s/index/Sample-Novel").unwrap();
        let dir = NovelDir::new("/out", &t);
        assert_eq!(
            dir.chapter_path(3),
            PathBuf::from("/out/Sample-Novel/Chapter_0003.txt")
        );
        assert_eq!(
            dir.error_path(12),
            PathBuf::from("/out/Sample-Novel/_error_chapter_12.txt")
        );
    }

    #[test]
    fn artifact_render_has_separator_and_blank_line() {
        let artifact = ChapterArtifact {
            title: "Chapter 1".into(),
            body: "Body".into(),
        };
        let rendered = artifact.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Chapter 1");
        assert_eq!(lines[1], "=".repeat(60));
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Body");
    }

    #[test]
    fn display_title_and_dir_name() {
        let t = TocTarget::parse("https://example.test/s/index/sample-novel").unwrap();
        assert_eq!(t.display_title(), "Sample Novel");
        assert_eq!(sanitize_dir_name(r#"a:b*c?"d"#), "abcd");
    }

    #[test]
    fn chapter_file_names_are_recognised() {
        assert_eq!(parse_chapter_file_name("Chapter_0004.txt"), Some(4));
        assert_eq!(parse_chapter_file_name("Chapter_12345.txt"), Some(12345));
        assert_eq!(parse_chapter_file_name("_error_chapter_3.txt"), None);
        assert_eq!(parse_chapter_file_name("Chapter_0004.json"), None);
    }

    #[tokio::test]
    async fn scan_existing_collects_indices() {
        let tmp = tempfile::tempdir().unwrap();
        let t = TocTarget::parse("https://example.test/s/index/Sample-Novel").unwrap();
        let dir = NovelDir::new(tmp.path(), &t);
        assert!(dir.scan_existing().await.unwrap().is_empty());

        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        for i in [1, 2, 4] {
            tokio::fs::write(dir.chapter_path(i), "x").await.unwrap();
        }
        tokio::fs::write(dir.error_path(3), "err").await.unwrap();
        // 中断写入留下的临时文件不算已存在
        let partial = dir.path().join("Chapter_0005.txt.0123abcd.part");
        tokio::fs::write(partial, "half").await.unwrap();

        let found: Vec<u32> = dir.scan_existing().await.unwrap().into_iter().collect();
        assert_eq!(found, vec![1, 2, 4]);
    }
}
