pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, DbResult};
pub use types::{
    BP_HEADER_PAGE, ExecutionMode, Lsn, PageNum, ReadWriteMode, Rid, SlotNum, TrxId,
};
pub use value::{AttrType, Value};
