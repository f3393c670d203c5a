//! In-memory, session-scoped caches. No I/O.

pub mod directory;
pub mod message_log;

pub use directory::ConversationDirectory;
pub use message_log::{AppendOutcome, FetchedPage, MessageLogStore, PageState, DEFAULT_PAGE_SIZE};
