use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::common::{DbResult, TrxId};
use crate::storage::db::Db;
use crate::storage::wal::{LogEntry, LogHandler, LogPayload, LogReplayer};

use super::mvcc::{MvccTrx, MvccTrxKit, Operation, OperationType};

/// Rebuilds transaction state from the log.
///
/// Insert/delete entries re-grow each transaction's operation list; a
/// commit entry is the linearization point and re-runs the commit with
/// its logged commit id; a rollback entry re-runs the rollback. Any
/// transaction still open when the log ends is rolled back.
pub struct MvccTrxLogReplayer {
    db: Arc<Db>,
    kit: Arc<MvccTrxKit>,
    log: Arc<LogHandler>,
    trxes: Mutex<HashMap<TrxId, MvccTrx>>,
}

impl MvccTrxLogReplayer {
    pub fn new(db: Arc<Db>, kit: Arc<MvccTrxKit>, log: Arc<LogHandler>) -> Self {
        Self {
            db,
            kit,
            log,
            trxes: Mutex::new(HashMap::new()),
        }
    }

    fn with_trx<F>(&self, trx_id: TrxId, f: F)
    where
        F: FnOnce(&mut MvccTrx),
    {
        let mut trxes = self.trxes.lock().unwrap();
        let trx = trxes.entry(trx_id).or_insert_with(|| {
            MvccTrx::new_recovering(
                self.kit.clone(),
                self.log.clone(),
                self.db.clone(),
                trx_id,
            )
        });
        f(trx);
    }
}

impl LogReplayer for MvccTrxLogReplayer {
    fn replay_entry(&self, entry: &LogEntry) -> DbResult<()> {
        match &entry.payload {
            LogPayload::InsertRecord {
                trx_id,
                table_id,
                rid,
            } => {
                self.with_trx(*trx_id, |trx| {
                    trx.push_operation(Operation {
                        op_type: OperationType::Insert,
                        table_id: *table_id,
                        rid: *rid,
                    });
                });
                Ok(())
            }
            LogPayload::DeleteRecord {
                trx_id,
                table_id,
                rid,
            } => {
                self.with_trx(*trx_id, |trx| {
                    trx.push_operation(Operation {
                        op_type: OperationType::Delete,
                        table_id: *table_id,
                        rid: *rid,
                    });
                });
                Ok(())
            }
            LogPayload::CommitTrx { trx_id, commit_xid } => {
                self.kit.observe_trx_id(*commit_xid);
                let trx = self.trxes.lock().unwrap().remove(trx_id);
                match trx {
                    Some(mut trx) => trx.commit_with_xid(*commit_xid),
                    None => Ok(()), // trx had no surviving operations
                }
            }
            LogPayload::RollbackTrx { trx_id } => {
                let trx = self.trxes.lock().unwrap().remove(trx_id);
                match trx {
                    Some(mut trx) => trx.rollback(),
                    None => Ok(()),
                }
            }
            // buffer pool entries belong to the other replayer
            _ => Ok(()),
        }
    }

    fn on_replay_done(&self) -> DbResult<()> {
        let leftovers: Vec<(TrxId, MvccTrx)> = {
            let mut trxes = self.trxes.lock().unwrap();
            trxes.drain().collect()
        };
        for (trx_id, mut trx) in leftovers {
            info!("rolling back unfinished trx {} found in the log", trx_id);
            trx.rollback()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AttrType, DbError, ReadWriteMode, Value};
    use crate::storage::table::Table;
    use crate::utils;

    fn open_db(dir: &std::path::Path) -> (Arc<Db>, Arc<MvccTrxKit>) {
        let db = Db::open(dir).unwrap();
        let kit = MvccTrxKit::new();
        let replayer = MvccTrxLogReplayer::new(db.clone(), kit.clone(), db.log_handler().clone());
        db.recover(&replayer).unwrap();
        (db, kit)
    }

    fn visible_ids(db: &Arc<Db>, kit: &Arc<MvccTrxKit>, table: &Table) -> Vec<i32> {
        let mut trx = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
        trx.start_if_need();
        let meta = table.meta();
        let id_field = meta.field("id").unwrap().clone();
        let mut scanner = table.scanner();
        let mut ids = Vec::new();
        loop {
            match scanner.next_record() {
                Ok(record) => {
                    if trx
                        .visit_record(&meta, &record.data, ReadWriteMode::ReadOnly)
                        .is_ok()
                    {
                        ids.push(id_field.get_int(&record.data));
                    }
                }
                Err(DbError::RecordEof) => break,
                Err(e) => panic!("scan failed: {}", e),
            }
        }
        ids.sort_unstable();
        ids
    }

    /// Committed work survives a restart; an open transaction's work
    /// does not.
    #[test]
    fn test_recovery_applies_commit_and_rolls_back_the_rest() {
        let dir = utils::test_dir("trxlog_recover");
        {
            let (db, kit) = open_db(&dir);
            let table = db
                .create_table("t", &[("id".to_string(), AttrType::Ints, 4)])
                .unwrap();

            let mut committed = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
            let mut rec = table.make_record(&[Value::Int(1)]).unwrap();
            committed.insert_record(&table, &mut rec).unwrap();
            let mut rec = table.make_record(&[Value::Int(2)]).unwrap();
            committed.insert_record(&table, &mut rec).unwrap();
            committed.commit().unwrap();

            let mut open = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
            let mut rec = table.make_record(&[Value::Int(3)]).unwrap();
            open.insert_record(&table, &mut rec).unwrap();
            // no commit: simulate a crash with the trx still open, but
            // with its log entries durable
            db.log_handler().flush().unwrap();
            db.sync_all().unwrap();
        }

        let (db, kit) = open_db(&dir);
        let table = db.find_table("t").unwrap();
        assert_eq!(visible_ids(&db, &kit, &table), vec![1, 2]);

        // fresh trx ids stay above everything the log mentioned
        let mut trx = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
        trx.start_if_need();
        assert!(trx.id() >= 3);
    }

    /// Replaying the same log twice must not change the outcome.
    #[test]
    fn test_recovery_is_idempotent() {
        let dir = utils::test_dir("trxlog_idem");
        {
            let (db, kit) = open_db(&dir);
            let table = db
                .create_table("t", &[("id".to_string(), AttrType::Ints, 4)])
                .unwrap();
            let mut trx = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
            let mut rec = table.make_record(&[Value::Int(10)]).unwrap();
            trx.insert_record(&table, &mut rec).unwrap();
            trx.commit().unwrap();
            db.sync_all().unwrap();
        }
        // two recoveries in a row
        {
            let (db, kit) = open_db(&dir);
            let table = db.find_table("t").unwrap();
            assert_eq!(visible_ids(&db, &kit, &table), vec![10]);
            db.sync_all().unwrap();
        }
        let (db, kit) = open_db(&dir);
        let table = db.find_table("t").unwrap();
        assert_eq!(visible_ids(&db, &kit, &table), vec![10]);
    }

    /// A delete whose commit entry made it to the log is re-applied.
    #[test]
    fn test_committed_delete_replays() {
        let dir = utils::test_dir("trxlog_delete");
        {
            let (db, kit) = open_db(&dir);
            let table = db
                .create_table("t", &[("id".to_string(), AttrType::Ints, 4)])
                .unwrap();
            let mut trx = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
            let mut rec = table.make_record(&[Value::Int(1)]).unwrap();
            let rid = trx.insert_record(&table, &mut rec).unwrap();
            let mut rec = table.make_record(&[Value::Int(2)]).unwrap();
            trx.insert_record(&table, &mut rec).unwrap();
            trx.commit().unwrap();

            let mut deleter = MvccTrx::new(kit.clone(), db.log_handler().clone(), db.clone());
            deleter.start_if_need();
            deleter.delete_record(&table, &rid).unwrap();
            deleter.commit().unwrap();
            db.sync_all().unwrap();
        }
        let (db, kit) = open_db(&dir);
        let table = db.find_table("t").unwrap();
        assert_eq!(visible_ids(&db, &kit, &table), vec![2]);
    }
}
