use std::fmt;

use serde::{Deserialize, Serialize};

/// Page number inside one file. Page 0 is the file header.
pub type PageNum = i32;
/// Slot number inside one record page.
pub type SlotNum = i32;
/// Log sequence number, globally monotonically increasing.
pub type Lsn = i64;
/// Transaction id. Positive when assigned; a negated id stored in a
/// record's begin/end field marks an uncommitted change of that trx.
pub type TrxId = i32;

pub const BP_HEADER_PAGE: PageNum = 0;

/// Identifier of a record: which page, which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_num: PageNum,
    pub slot_num: SlotNum,
}

impl Rid {
    pub fn new(page_num: PageNum, slot_num: SlotNum) -> Self {
        Self { page_num, slot_num }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.page_num, self.slot_num)
    }
}

/// Read/write intent when visiting records, drives the MVCC visibility
/// decision for uncommitted deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWriteMode {
    ReadOnly,
    ReadWrite,
}

/// Session-level choice between row-at-a-time and columnar execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    TupleIterator,
    ChunkIterator,
}
