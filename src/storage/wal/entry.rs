use std::iter;

use crate::common::{Lsn, PageNum, Rid, TrxId};

/// Which subsystem an entry belongs to. Replayers filter on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogModule {
    BufferPool,
    Transaction,
}

/// Operations recorded in the write-ahead log.
///
/// Buffer-pool ops and transaction ops are two independent families;
/// they share one LSN sequence so recovery sees a single total order.
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    AllocatePage {
        buffer_pool_id: i32,
        page_num: PageNum,
    },
    DeallocatePage {
        buffer_pool_id: i32,
        page_num: PageNum,
    },
    /// Written right before a page copy leaves the buffer pool, so the
    /// durable log tail always covers any durable page (WAL rule).
    FlushPage {
        buffer_pool_id: i32,
        page_num: PageNum,
        page_lsn: Lsn,
    },
    InsertRecord {
        trx_id: TrxId,
        table_id: i32,
        rid: Rid,
    },
    DeleteRecord {
        trx_id: TrxId,
        table_id: i32,
        rid: Rid,
    },
    CommitTrx {
        trx_id: TrxId,
        commit_xid: TrxId,
    },
    RollbackTrx {
        trx_id: TrxId,
    },
}

impl LogPayload {
    pub fn module(&self) -> LogModule {
        match self {
            LogPayload::AllocatePage { .. }
            | LogPayload::DeallocatePage { .. }
            | LogPayload::FlushPage { .. } => LogModule::BufferPool,
            _ => LogModule::Transaction,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub lsn: Lsn,
    pub payload: LogPayload,
}

impl LogEntry {
    /// Serialize the entry to bytes.
    /// Layout: [total_size: u32][lsn: i64][op: u8][op fields...][crc: u32]
    /// Warn: the crc must be right after the op fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(48);
        // 1. total_size placeholder
        buf.extend(&0u32.to_le_bytes());
        // 2. lsn
        buf.extend(&self.lsn.to_le_bytes());
        // 3. operation
        match &self.payload {
            LogPayload::AllocatePage {
                buffer_pool_id,
                page_num,
            } => {
                buf.push(0u8);
                buf.extend(&buffer_pool_id.to_le_bytes());
                buf.extend(&page_num.to_le_bytes());
            }
            LogPayload::DeallocatePage {
                buffer_pool_id,
                page_num,
            } => {
                buf.push(1u8);
                buf.extend(&buffer_pool_id.to_le_bytes());
                buf.extend(&page_num.to_le_bytes());
            }
            LogPayload::FlushPage {
                buffer_pool_id,
                page_num,
                page_lsn,
            } => {
                buf.push(2u8);
                buf.extend(&buffer_pool_id.to_le_bytes());
                buf.extend(&page_num.to_le_bytes());
                buf.extend(&page_lsn.to_le_bytes());
            }
            LogPayload::InsertRecord {
                trx_id,
                table_id,
                rid,
            } => {
                buf.push(3u8);
                buf.extend(&trx_id.to_le_bytes());
                buf.extend(&table_id.to_le_bytes());
                buf.extend(&rid.page_num.to_le_bytes());
                buf.extend(&rid.slot_num.to_le_bytes());
            }
            LogPayload::DeleteRecord {
                trx_id,
                table_id,
                rid,
            } => {
                buf.push(4u8);
                buf.extend(&trx_id.to_le_bytes());
                buf.extend(&table_id.to_le_bytes());
                buf.extend(&rid.page_num.to_le_bytes());
                buf.extend(&rid.slot_num.to_le_bytes());
            }
            LogPayload::CommitTrx { trx_id, commit_xid } => {
                buf.push(5u8);
                buf.extend(&trx_id.to_le_bytes());
                buf.extend(&commit_xid.to_le_bytes());
            }
            LogPayload::RollbackTrx { trx_id } => {
                buf.push(6u8);
                buf.extend(&trx_id.to_le_bytes());
            }
        }
        // 4. crc placeholder
        buf.extend(&0u32.to_le_bytes());
        // 5. fill in total size
        let total_size = buf.len() as u32;
        buf[0..4].copy_from_slice(&total_size.to_le_bytes());
        // 6. crc over everything before the crc field
        let crc_begin = buf.len() - 4;
        let crc = crc32fast::hash(&buf[..crc_begin]);
        buf[crc_begin..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Iterator deserializing consecutive entries from a byte slice.
    /// Stops at the first truncated or corrupt entry, which makes a torn
    /// tail after a crash terminate replay instead of failing it.
    pub fn from_bytes(mut buf: &[u8]) -> impl Iterator<Item = LogEntry> + '_ {
        iter::from_fn(move || {
            if buf.len() < 4 {
                return None;
            }
            let total_size = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
            if total_size < 17 || total_size > buf.len() {
                return None;
            }
            let entry_buf = &buf[..total_size];
            let crc_begin = total_size - 4;
            let stored_crc = u32::from_le_bytes(entry_buf[crc_begin..].try_into().unwrap());
            if crc32fast::hash(&entry_buf[..crc_begin]) != stored_crc {
                return None;
            }

            let lsn = i64::from_le_bytes(entry_buf[4..12].try_into().unwrap());
            let op = entry_buf[12];
            let p = &entry_buf[13..crc_begin];
            let payload = match op {
                0 | 1 => {
                    let buffer_pool_id = i32::from_le_bytes(p[0..4].try_into().ok()?);
                    let page_num = i32::from_le_bytes(p[4..8].try_into().ok()?);
                    if op == 0 {
                        LogPayload::AllocatePage {
                            buffer_pool_id,
                            page_num,
                        }
                    } else {
                        LogPayload::DeallocatePage {
                            buffer_pool_id,
                            page_num,
                        }
                    }
                }
                2 => LogPayload::FlushPage {
                    buffer_pool_id: i32::from_le_bytes(p[0..4].try_into().ok()?),
                    page_num: i32::from_le_bytes(p[4..8].try_into().ok()?),
                    page_lsn: i64::from_le_bytes(p[8..16].try_into().ok()?),
                },
                3 | 4 => {
                    let trx_id = i32::from_le_bytes(p[0..4].try_into().ok()?);
                    let table_id = i32::from_le_bytes(p[4..8].try_into().ok()?);
                    let rid = Rid::new(
                        i32::from_le_bytes(p[8..12].try_into().ok()?),
                        i32::from_le_bytes(p[12..16].try_into().ok()?),
                    );
                    if op == 3 {
                        LogPayload::InsertRecord {
                            trx_id,
                            table_id,
                            rid,
                        }
                    } else {
                        LogPayload::DeleteRecord {
                            trx_id,
                            table_id,
                            rid,
                        }
                    }
                }
                5 => LogPayload::CommitTrx {
                    trx_id: i32::from_le_bytes(p[0..4].try_into().ok()?),
                    commit_xid: i32::from_le_bytes(p[4..8].try_into().ok()?),
                },
                6 => LogPayload::RollbackTrx {
                    trx_id: i32::from_le_bytes(p[0..4].try_into().ok()?),
                },
                _ => return None,
            };

            buf = &buf[total_size..];
            Some(LogEntry { lsn, payload })
        })
    }
}
