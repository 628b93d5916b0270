mod entry;
mod wal;


pub use entry::{LogEntry, LogModule, LogPayload};
pub use wal::{LogHandler, LogReplayer};
