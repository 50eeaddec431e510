pub mod browser;
pub mod client;

use std::sync::Arc;

use tracing::debug;

use crate::core::config::{AppConfig, ReaderKind};
use crate::core::error::Result;
use crate::interfaces::PageReader;

pub use browser::ChromiumReader;
pub use client::StaticReader;

/// 按配置构建页面读取器
pub fn build_reader(config: Arc<AppConfig>) -> Result<Arc<dyn PageReader>> {
    debug!("页面读取后端: {}", config.scraper.reader);
    Ok(match config.scraper.reader {
        ReaderKind::Chromium => Arc::new(ChromiumReader::new(config)),
        ReaderKind::Static => Arc::new(StaticReader::new(&config)?),
    })
}
