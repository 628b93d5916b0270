pub mod log;
pub mod mvcc;

pub use log::MvccTrxLogReplayer;
pub use mvcc::{MAX_TRX_ID, MvccTrx, MvccTrxKit, Operation, OperationType};
