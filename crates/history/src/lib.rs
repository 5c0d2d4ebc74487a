pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod recorder;
pub mod store;

pub use entry::{EntryId, HistoryEntry, HistoryEntryBuilder, HistoryKind};
pub use error::{HistoryError, Result};
pub use memory::InMemoryHistoryStore;
pub use postgres::PostgresHistoryStore;
pub use query::HistoryQuery;
pub use recorder::{ChannelRecorder, HistoryRecorder, InMemoryRecorder, NoopRecorder, spawn_writer};
pub use store::{HistoryStore, HistoryStoreExt, HistoryStream};
