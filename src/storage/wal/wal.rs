use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{info, warn};

use crate::common::error::{io_read_err, io_write_err};
use crate::common::{DbResult, Lsn};

use super::entry::{LogEntry, LogPayload};

const HEADER_MAGIC: u32 = 0x4244_494d; // 'MIDB' in little endian hex

/// A subsystem that knows how to re-apply its own log entries.
/// Each replayer inspects the payload tag and ignores foreign entries.
pub trait LogReplayer {
    fn replay_entry(&self, entry: &LogEntry) -> DbResult<()>;

    /// Called once after the whole log has been scanned.
    fn on_replay_done(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Append-only write-ahead log. The sole writer of the log file; every
/// append gets the next LSN, so LSNs are totally ordered.
pub struct LogHandler {
    log_file: Mutex<fs::File>,
    next_lsn: AtomicI64,
    log_path: PathBuf,
}

impl LogHandler {
    pub fn open(path: &Path) -> DbResult<Self> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_write_err("create log dir", e))?;
            }
            let mut file =
                fs::File::create(path).map_err(|e| io_write_err("create log file", e))?;
            file.write_all(&HEADER_MAGIC.to_le_bytes())
                .map_err(|e| io_write_err("init log header", e))?;
        }
        let mut log_file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| io_read_err("open log file", e))?;

        let mut header = [0u8; 4];
        log_file
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_read_err("seek log header", e))?;
        log_file
            .read_exact(&mut header)
            .map_err(|e| io_read_err("read log header", e))?;
        if u32::from_le_bytes(header) != HEADER_MAGIC {
            // invalid header, re-initialize
            warn!("log header invalid, re-initializing {}", path.display());
            drop(log_file);
            let mut file =
                fs::File::create(path).map_err(|e| io_write_err("recreate log file", e))?;
            file.write_all(&HEADER_MAGIC.to_le_bytes())
                .map_err(|e| io_write_err("rewrite log header", e))?;
            log_file = fs::OpenOptions::new()
                .read(true)
                .append(true)
                .open(path)
                .map_err(|e| io_read_err("reopen log file", e))?;
        }

        Ok(Self {
            log_file: Mutex::new(log_file),
            next_lsn: AtomicI64::new(1),
            log_path: path.to_path_buf(),
        })
    }

    /// Append one entry; returns its LSN. The entry is buffered by the
    /// OS until the next [`flush`](Self::flush) (or an append_and_flush).
    pub fn append(&self, payload: LogPayload) -> DbResult<Lsn> {
        let mut file = self.log_file.lock().unwrap();
        // lsn assignment happens under the file lock so the on-disk
        // order matches the lsn order
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let entry = LogEntry { lsn, payload };
        file.write_all(&entry.to_bytes())
            .map_err(|e| io_write_err("append log entry", e))?;
        Ok(lsn)
    }

    /// Durability point: commit, page flush.
    pub fn append_and_flush(&self, payload: LogPayload) -> DbResult<Lsn> {
        let lsn = self.append(payload)?;
        self.flush()?;
        Ok(lsn)
    }

    pub fn flush(&self) -> DbResult<()> {
        let file = self.log_file.lock().unwrap();
        file.sync_data()
            .map_err(|e| io_write_err("sync log file", e))
    }

    /// Scan the whole log in LSN order, feeding every entry to every
    /// replayer, then fire the replayers' completion hooks. Restores the
    /// LSN counter to one past the last entry seen.
    pub fn replay(&self, replayers: &[&dyn LogReplayer]) -> DbResult<Lsn> {
        let buf = {
            let mut file = self.log_file.lock().unwrap();
            file.seek(SeekFrom::Start(4))
                .map_err(|e| io_read_err("seek log body", e))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| io_read_err("read log body", e))?;
            buf
        };

        let mut last_lsn: Lsn = 0;
        let mut count = 0usize;
        for entry in LogEntry::from_bytes(&buf) {
            for replayer in replayers {
                replayer.replay_entry(&entry)?;
            }
            last_lsn = entry.lsn;
            count += 1;
        }
        for replayer in replayers {
            replayer.on_replay_done()?;
        }

        self.next_lsn.store(last_lsn + 1, Ordering::SeqCst);
        info!(
            "log replay done. file={}, entries={}, last lsn={}",
            self.log_path.display(),
            count,
            last_lsn
        );
        Ok(last_lsn)
    }

    pub fn current_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst) - 1
    }
}
