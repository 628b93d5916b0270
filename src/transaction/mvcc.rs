use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

use crate::common::{DbError, DbResult, ReadWriteMode, Rid, TrxId};
use crate::storage::db::Db;
use crate::storage::table::{Table, TableMeta};
use crate::storage::wal::{LogHandler, LogPayload};

pub const MAX_TRX_ID: TrxId = i32::MAX;

/// Hands out transaction ids and tracks which transactions are live.
pub struct MvccTrxKit {
    current_trx_id: AtomicI32,
    live_trx_ids: Mutex<Vec<TrxId>>,
}

impl MvccTrxKit {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current_trx_id: AtomicI32::new(0),
            live_trx_ids: Mutex::new(Vec::new()),
        })
    }

    pub fn next_trx_id(&self) -> TrxId {
        self.current_trx_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn max_trx_id(&self) -> TrxId {
        MAX_TRX_ID
    }

    /// Recovery feeds historical ids through here so fresh ids never
    /// collide with replayed ones.
    pub fn observe_trx_id(&self, trx_id: TrxId) {
        self.current_trx_id.fetch_max(trx_id, Ordering::SeqCst);
    }

    fn on_started(&self, trx_id: TrxId) {
        self.live_trx_ids.lock().unwrap().push(trx_id);
    }

    fn on_finished(&self, trx_id: TrxId) {
        let mut live = self.live_trx_ids.lock().unwrap();
        live.retain(|id| *id != trx_id);
    }

    pub fn live_trx_ids(&self) -> Vec<TrxId> {
        self.live_trx_ids.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Delete,
}

/// One entry of a transaction's operation list. Tables are referenced
/// by id; they outlive any transaction within one process.
#[derive(Debug, Clone)]
pub struct Operation {
    pub op_type: OperationType,
    pub table_id: i32,
    pub rid: Rid,
}

/// One MVCC transaction.
///
/// Every row carries hidden `(begin_xid, end_xid)` fields. An
/// uncommitted insert stores `begin = -trx_id`; an uncommitted delete
/// stores `end = -trx_id`. Commit replaces the negated ids with the
/// commit id; rollback restores what it finds in reverse order.
pub struct MvccTrx {
    kit: Arc<MvccTrxKit>,
    log: Arc<LogHandler>,
    db: Arc<Db>,
    trx_id: TrxId,
    started: bool,
    recovering: bool,
    operations: Vec<Operation>,
}

impl MvccTrx {
    pub fn new(kit: Arc<MvccTrxKit>, log: Arc<LogHandler>, db: Arc<Db>) -> Self {
        Self {
            kit,
            log,
            db,
            trx_id: 0,
            started: false,
            recovering: false,
            operations: Vec::new(),
        }
    }

    /// A transaction reconstructed from the log during recovery.
    pub fn new_recovering(
        kit: Arc<MvccTrxKit>,
        log: Arc<LogHandler>,
        db: Arc<Db>,
        trx_id: TrxId,
    ) -> Self {
        kit.observe_trx_id(trx_id);
        Self {
            kit,
            log,
            db,
            trx_id,
            started: true,
            recovering: true,
            operations: Vec::new(),
        }
    }

    pub fn id(&self) -> TrxId {
        self.trx_id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start_if_need(&mut self) {
        if !self.started {
            debug_assert!(
                self.operations.is_empty(),
                "starting a trx with a non-empty operation list"
            );
            self.trx_id = self.kit.next_trx_id();
            self.started = true;
            self.kit.on_started(self.trx_id);
            debug!("current thread change to new trx with {}", self.trx_id);
        }
    }

    /// Stamp the hidden fields, insert, log, remember.
    pub fn insert_record(&mut self, table: &Table, record: &mut [u8]) -> DbResult<Rid> {
        self.start_if_need();
        let meta = table.meta();
        let (begin_field, end_field) = meta.trx_fields();
        begin_field.set_int(record, -self.trx_id);
        end_field.set_int(record, self.kit.max_trx_id());

        let rid = table.insert_record(record)?;

        if !self.recovering {
            self.log.append(LogPayload::InsertRecord {
                trx_id: self.trx_id,
                table_id: table.table_id(),
                rid,
            })?;
        }
        self.operations.push(Operation {
            op_type: OperationType::Insert,
            table_id: table.table_id(),
            rid,
        });
        Ok(rid)
    }

    /// Mark the row deleted by this transaction. A row someone else is
    /// deleting right now fails fast with a conflict.
    pub fn delete_record(&mut self, table: &Table, rid: &Rid) -> DbResult<()> {
        self.start_if_need();
        let meta = table.meta();
        let (_, end_field) = meta.trx_fields();
        let trx_id = self.trx_id;

        let mut visit_result: DbResult<()> = Ok(());
        table.visit_record(rid, |record| {
            if let Err(e) = visit_record_data(&meta, record, trx_id, ReadWriteMode::ReadWrite) {
                visit_result = Err(e);
                return false;
            }
            end_field.set_int(record, -trx_id);
            true
        })?;
        if let Err(e) = visit_result {
            trace!("record is not visible. rid={}, rc={}", rid, e.code());
            return Err(e);
        }

        if !self.recovering {
            self.log.append(LogPayload::DeleteRecord {
                trx_id: self.trx_id,
                table_id: table.table_id(),
                rid: *rid,
            })?;
        }
        self.operations.push(Operation {
            op_type: OperationType::Delete,
            table_id: table.table_id(),
            rid: *rid,
        });
        Ok(())
    }

    /// Visibility of a raw record for this transaction.
    pub fn visit_record(
        &self,
        meta: &TableMeta,
        record: &[u8],
        mode: ReadWriteMode,
    ) -> DbResult<()> {
        visit_record_data(meta, record, self.trx_id, mode)
    }

    pub fn commit(&mut self) -> DbResult<()> {
        if !self.started {
            return Ok(());
        }
        let commit_xid = self.kit.next_trx_id();
        self.commit_with_xid(commit_xid)
    }

    /// Stamp every touched row with the commit id, then write the
    /// commit log entry — the entry is the linearization point replay
    /// relies on.
    pub fn commit_with_xid(&mut self, commit_xid: TrxId) -> DbResult<()> {
        self.started = false;
        let operations = std::mem::take(&mut self.operations);

        for operation in &operations {
            let Some(table) = self.db.find_table_by_id(operation.table_id) else {
                warn!(
                    "commit: table {} is gone, skipping {}",
                    operation.table_id, operation.rid
                );
                continue;
            };
            let meta = table.meta();
            let (begin_field, end_field) = meta.trx_fields();
            let trx_id = self.trx_id;
            let recovering = self.recovering;

            let visit_result = match operation.op_type {
                OperationType::Insert => table.visit_record(&operation.rid, |record| {
                    let begin = begin_field.get_int(record);
                    if begin != -trx_id {
                        // replaying a commit that already ran
                        debug_assert!(
                            recovering,
                            "commit found begin xid {} for trx {}",
                            begin, trx_id
                        );
                        return false;
                    }
                    begin_field.set_int(record, commit_xid);
                    true
                }),
                OperationType::Delete => table.visit_record(&operation.rid, |record| {
                    let end = end_field.get_int(record);
                    if end != -trx_id {
                        debug_assert!(
                            recovering,
                            "commit found end xid {} for trx {}",
                            end, trx_id
                        );
                        return false;
                    }
                    end_field.set_int(record, commit_xid);
                    true
                }),
            };
            match visit_result {
                Ok(()) => {}
                // a logged row whose page never reached disk before the
                // crash; nothing to stamp
                Err(DbError::RecordNotExist(_)) if recovering => continue,
                Err(e) => return Err(e),
            }
        }

        if !self.recovering {
            self.log.append_and_flush(LogPayload::CommitTrx {
                trx_id: self.trx_id,
                commit_xid,
            })?;
        }
        self.kit.on_finished(self.trx_id);
        trace!(
            "append trx commit log. trx id={}, commit_xid={}",
            self.trx_id, commit_xid
        );
        Ok(())
    }

    /// Undo in reverse order: inserted rows are deleted again, deleted
    /// rows get their end xid restored.
    pub fn rollback(&mut self) -> DbResult<()> {
        self.started = false;
        let operations = std::mem::take(&mut self.operations);

        for operation in operations.iter().rev() {
            let Some(table) = self.db.find_table_by_id(operation.table_id) else {
                warn!(
                    "rollback: table {} is gone, skipping {}",
                    operation.table_id, operation.rid
                );
                continue;
            };
            let meta = table.meta();
            let (begin_field, end_field) = meta.trx_fields();
            let trx_id = self.trx_id;

            match operation.op_type {
                OperationType::Insert => {
                    if self.recovering {
                        // replay may have rolled this back already; only
                        // delete rows this trx still owns
                        match table.get_record(&operation.rid) {
                            Ok(record) => {
                                if begin_field.get_int(&record.data) != -trx_id {
                                    continue;
                                }
                            }
                            Err(DbError::RecordNotExist(_)) => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    table.delete_record(&operation.rid)?;
                }
                OperationType::Delete => {
                    let visit_result = table.visit_record(&operation.rid, |record| {
                        if end_field.get_int(record) != -trx_id {
                            return false;
                        }
                        end_field.set_int(record, MAX_TRX_ID);
                        true
                    });
                    match visit_result {
                        Ok(()) => {}
                        Err(DbError::RecordNotExist(_)) if self.recovering => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        if !self.recovering {
            self.log
                .append_and_flush(LogPayload::RollbackTrx { trx_id: self.trx_id })?;
        }
        self.kit.on_finished(self.trx_id);
        Ok(())
    }

    pub fn operations_len(&self) -> usize {
        self.operations.len()
    }

    /// Recovery uses this to rebuild the operation list from the log.
    pub fn push_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }
}

/// The visibility truth table. Let b = begin xid, e = end xid, T = the
/// reader's trx id:
/// - b > 0 and e > 0: committed row, visible iff b <= T <= e.
/// - b < 0: someone's uncommitted insert, visible only to its creator.
/// - e < 0: someone's uncommitted delete. A reader still sees the row
///   unless it deleted it itself; a writer hitting another trx's
///   pending delete gets a conflict instead of blocking.
pub fn visit_record_data(
    meta: &TableMeta,
    record: &[u8],
    trx_id: TrxId,
    mode: ReadWriteMode,
) -> DbResult<()> {
    let (begin_field, end_field) = meta.trx_fields();
    let begin_xid = begin_field.get_int(record);
    let end_xid = end_field.get_int(record);

    if begin_xid > 0 && end_xid > 0 {
        if trx_id >= begin_xid && trx_id <= end_xid {
            Ok(())
        } else {
            trace!(
                "record invisible. trx id={}, begin xid={}, end xid={}",
                trx_id, begin_xid, end_xid
            );
            Err(DbError::RecordInvisible)
        }
    } else if begin_xid < 0 {
        if -begin_xid == trx_id {
            Ok(())
        } else {
            trace!(
                "record invisible. someone is inserting this record right now. trx id={}, begin xid={}",
                trx_id, begin_xid
            );
            Err(DbError::RecordInvisible)
        }
    } else if end_xid < 0 {
        match mode {
            ReadWriteMode::ReadOnly => {
                if -end_xid != trx_id {
                    Ok(())
                } else {
                    Err(DbError::RecordInvisible)
                }
            }
            ReadWriteMode::ReadWrite => {
                if -end_xid != trx_id {
                    trace!(
                        "concurrency conflict. someone is deleting this record right now. trx id={}, end xid={}",
                        trx_id, end_xid
                    );
                    Err(DbError::LockedConcurrencyConflict(format!(
                        "record is being deleted by trx {}",
                        -end_xid
                    )))
                } else {
                    Err(DbError::RecordInvisible)
                }
            }
        }
    } else {
        Err(DbError::Internal(format!(
            "record with zero xid. begin={}, end={}",
            begin_xid, end_xid
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AttrType, Value};
    use crate::utils;

    fn setup(annot: &str) -> (Arc<Db>, Arc<MvccTrxKit>, Arc<Table>) {
        let dir = utils::test_dir(annot);
        let db = Db::open(&dir).unwrap();
        let table = db
            .create_table(
                "t",
                &[
                    ("id".to_string(), AttrType::Ints, 4),
                    ("name".to_string(), AttrType::Chars, 8),
                ],
            )
            .unwrap();
        (db.clone(), MvccTrxKit::new(), table)
    }

    fn new_trx(db: &Arc<Db>, kit: &Arc<MvccTrxKit>) -> MvccTrx {
        MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone())
    }

    fn insert_row(trx: &mut MvccTrx, table: &Table, id: i32) -> Rid {
        let mut record = table
            .make_record(&[Value::Int(id), Value::Chars(format!("r{}", id))])
            .unwrap();
        trx.insert_record(table, &mut record).unwrap()
    }

    fn visible_ids(trx: &MvccTrx, table: &Table) -> Vec<i32> {
        let meta = table.meta();
        let id_field = meta.field("id").unwrap().clone();
        let mut scanner = table.scanner();
        let mut ids = Vec::new();
        loop {
            match scanner.next_record() {
                Ok(record) => {
                    match trx.visit_record(&meta, &record.data, ReadWriteMode::ReadOnly) {
                        Ok(()) => ids.push(id_field.get_int(&record.data)),
                        Err(DbError::RecordInvisible) => {}
                        Err(e) => panic!("visit failed: {}", e),
                    }
                }
                Err(DbError::RecordEof) => break,
                Err(e) => panic!("scan failed: {}", e),
            }
        }
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_own_writes_visible_before_commit() {
        let (db, kit, table) = setup("mvcc_own");
        let mut trx = new_trx(&db, &kit);
        insert_row(&mut trx, &table, 1);

        // the writer sees its own uncommitted insert
        assert_eq!(visible_ids(&trx, &table), vec![1]);
        // another transaction does not
        let mut other = new_trx(&db, &kit);
        other.start_if_need();
        assert_eq!(visible_ids(&other, &table), Vec::<i32>::new());

        trx.commit().unwrap();
        // a later transaction sees the committed row
        let mut late = new_trx(&db, &kit);
        late.start_if_need();
        assert_eq!(visible_ids(&late, &table), vec![1]);
    }

    #[test]
    fn test_rollback_hides_writes() {
        let (db, kit, table) = setup("mvcc_rollback");
        let mut trx = new_trx(&db, &kit);
        insert_row(&mut trx, &table, 3);
        trx.rollback().unwrap();
        assert_eq!(trx.operations_len(), 0);

        let mut reader = new_trx(&db, &kit);
        reader.start_if_need();
        assert_eq!(visible_ids(&reader, &table), Vec::<i32>::new());
    }

    #[test]
    fn test_delete_and_commit() {
        let (db, kit, table) = setup("mvcc_delete");
        let mut setup_trx = new_trx(&db, &kit);
        let rid = insert_row(&mut setup_trx, &table, 1);
        insert_row(&mut setup_trx, &table, 2);
        setup_trx.commit().unwrap();

        let mut trx = new_trx(&db, &kit);
        trx.start_if_need();
        trx.delete_record(&table, &rid).unwrap();
        // deleter no longer sees the row, concurrent readers still do
        assert_eq!(visible_ids(&trx, &table), vec![2]);
        let mut reader = new_trx(&db, &kit);
        reader.start_if_need();
        assert_eq!(visible_ids(&reader, &table), vec![1, 2]);

        trx.commit().unwrap();
        let mut late = new_trx(&db, &kit);
        late.start_if_need();
        assert_eq!(visible_ids(&late, &table), vec![2]);
    }

    #[test]
    fn test_double_delete_conflicts() {
        let (db, kit, table) = setup("mvcc_conflict");
        let mut setup_trx = new_trx(&db, &kit);
        let rid = insert_row(&mut setup_trx, &table, 9);
        setup_trx.commit().unwrap();

        let mut a = new_trx(&db, &kit);
        a.start_if_need();
        a.delete_record(&table, &rid).unwrap();

        let mut b = new_trx(&db, &kit);
        b.start_if_need();
        assert!(matches!(
            b.delete_record(&table, &rid),
            Err(DbError::LockedConcurrencyConflict(_))
        ));

        // after a rolls back, b can delete
        a.rollback().unwrap();
        b.delete_record(&table, &rid).unwrap();
        b.commit().unwrap();
    }

    #[test]
    fn test_delete_rollback_restores_row() {
        let (db, kit, table) = setup("mvcc_del_rollback");
        let mut setup_trx = new_trx(&db, &kit);
        let rid = insert_row(&mut setup_trx, &table, 5);
        setup_trx.commit().unwrap();

        let mut trx = new_trx(&db, &kit);
        trx.start_if_need();
        trx.delete_record(&table, &rid).unwrap();
        trx.rollback().unwrap();

        let mut reader = new_trx(&db, &kit);
        reader.start_if_need();
        assert_eq!(visible_ids(&reader, &table), vec![5]);
        // the end xid is back at the maximum
        let meta = table.meta();
        let (_, end_field) = meta.trx_fields();
        let record = table.get_record(&rid).unwrap();
        assert_eq!(end_field.get_int(&record.data), MAX_TRX_ID);
    }

    #[test]
    fn test_no_zero_xids_after_any_sequence() {
        let (db, kit, table) = setup("mvcc_no_zero");
        let mut t1 = new_trx(&db, &kit);
        insert_row(&mut t1, &table, 1);
        insert_row(&mut t1, &table, 2);
        t1.commit().unwrap();
        let mut t2 = new_trx(&db, &kit);
        insert_row(&mut t2, &table, 3);
        t2.rollback().unwrap();

        let meta = table.meta();
        let (begin_field, end_field) = meta.trx_fields();
        let mut scanner = table.scanner();
        while let Ok(record) = scanner.next_record() {
            assert_ne!(begin_field.get_int(&record.data), 0);
            assert_ne!(end_field.get_int(&record.data), 0);
        }
    }
}
