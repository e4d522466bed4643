pub mod book_source;
pub mod chat;
pub mod content_cache;

pub use book_source::{BookSource, FileBookSource, HttpBookSource};
pub use chat::{ChatSession, ZippelSseEvent, open_session, stream_assistant_reply};
pub use content_cache::{BOOK_CACHE_DISPLAY_NAME, ContentCacheManager};
