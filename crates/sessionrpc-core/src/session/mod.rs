//! Session records and the stores that hold them.
//!
//! The bridge only ever talks to a store through the [`SessionStore`] trait.
//! Two implementations ship with the crate:
//! - [`MemorySessionStore`]: in-process, idle expiry, lost on restart
//! - [`SqliteSessionStore`]: durable, one row per session

mod memory;
mod record;
mod sqlite;
mod store;

pub use memory::MemorySessionStore;
pub use record::SessionRecord;
pub use sqlite::SqliteSessionStore;
pub use store::{SessionStore, SessionStoreConfig};
