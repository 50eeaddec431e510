pub mod reader;

pub use reader::{PageLink, PageReader, PageSession, UNTITLED_CHAPTER};
