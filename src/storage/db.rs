use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::common::error::io_access_err;
use crate::common::{AttrType, DbError, DbResult};
use crate::config::{
    DBLWR_FILE_NAME, DBLWR_MAX_PAGES, FRAME_POOL_CAPACITY, MAX_TABLE_NAME_SIZE,
    TABLE_META_SUFFIX, WAL_FILE_NAME,
};
use crate::storage::buffer_pool::{BufferPoolLogReplayer, BufferPoolManager};
use crate::storage::dblwr::DoubleWriteBuffer;
use crate::storage::table::{Table, TableMeta};
use crate::storage::wal::{LogHandler, LogReplayer};

/// The database: a directory of tables sharing one buffer pool manager,
/// one log, and one double-write buffer.
pub struct Db {
    base_dir: PathBuf,
    manager: Arc<BufferPoolManager>,
    log: Arc<LogHandler>,
    dblwr: Arc<DoubleWriteBuffer>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    next_table_id: AtomicI32,
}

impl Db {
    /// Open (or initialize) the database directory and every table
    /// found in it. Recovery is a separate step, driven once the
    /// transaction kit exists.
    pub fn open(base_dir: &Path) -> DbResult<Arc<Self>> {
        fs::create_dir_all(base_dir).map_err(|e| io_access_err("create db dir", e))?;

        let log = Arc::new(LogHandler::open(&base_dir.join(WAL_FILE_NAME))?);
        let dblwr = Arc::new(DoubleWriteBuffer::open(
            &base_dir.join(DBLWR_FILE_NAME),
            DBLWR_MAX_PAGES,
        )?);
        let manager = BufferPoolManager::new(log.clone(), dblwr.clone(), FRAME_POOL_CAPACITY);

        let db = Arc::new(Self {
            base_dir: base_dir.to_path_buf(),
            manager: manager.clone(),
            log,
            dblwr,
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicI32::new(1),
        });

        // every *.meta.json in the directory is one table
        let mut table_names = Vec::new();
        for entry in fs::read_dir(base_dir).map_err(|e| io_access_err("list db dir", e))? {
            let entry = entry.map_err(|e| io_access_err("list db dir", e))?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(table_name) = file_name.strip_suffix(TABLE_META_SUFFIX) {
                table_names.push(table_name.to_string());
            }
        }
        for table_name in table_names {
            let table = Table::open(manager.clone(), base_dir, &table_name)?;
            db.next_table_id
                .fetch_max(table.table_id() + 1, Ordering::SeqCst);
            db.tables
                .write()
                .unwrap()
                .insert(table_name.clone(), Arc::new(table));
            info!("opened table {}", table_name);
        }
        Ok(db)
    }

    /// Crash recovery: first put torn pages right from the double-write
    /// staging area, then replay the log. Transaction replay is supplied
    /// by the caller so the storage layer stays below the trx manager.
    pub fn recover(&self, trx_replayer: &dyn LogReplayer) -> DbResult<()> {
        self.dblwr.recover()?;
        let bp_replayer = BufferPoolLogReplayer::new(self.manager.clone());
        self.log.replay(&[&bp_replayer, trx_replayer])?;
        Ok(())
    }

    pub fn create_table(
        &self,
        name: &str,
        fields: &[(String, AttrType, usize)],
    ) -> DbResult<Arc<Table>> {
        if name.is_empty() || name.len() > MAX_TABLE_NAME_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "bad table name: {}",
                name
            )));
        }
        let mut tables = self.tables.write().unwrap();
        if tables.contains_key(name) {
            return Err(DbError::SchemaTableExist(name.to_string()));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let meta = TableMeta::new(table_id, name, fields)?;
        let table = Arc::new(Table::create(self.manager.clone(), &self.base_dir, meta)?);
        tables.insert(name.to_string(), table.clone());
        Ok(table)
    }

    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        let table = {
            let mut tables = self.tables.write().unwrap();
            tables
                .remove(name)
                .ok_or_else(|| DbError::SchemaTableNotExist(name.to_string()))?
        };
        table.close()?;
        table.destroy()?;
        info!("dropped table {}", name);
        Ok(())
    }

    pub fn find_table(&self, name: &str) -> DbResult<Arc<Table>> {
        self.tables
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::SchemaTableNotExist(name.to_string()))
    }

    pub fn find_table_by_id(&self, table_id: i32) -> Option<Arc<Table>> {
        self.tables
            .read()
            .unwrap()
            .values()
            .find(|t| t.table_id() == table_id)
            .cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Checkpoint: make every table durable, drain the double-write
    /// buffer, flush the log.
    pub fn sync_all(&self) -> DbResult<()> {
        for table in self.tables.read().unwrap().values() {
            table.sync()?;
        }
        self.manager.flush_all()
    }

    pub fn log_handler(&self) -> &Arc<LogHandler> {
        &self.log
    }

    pub fn buffer_pool_manager(&self) -> &Arc<BufferPoolManager> {
        &self.manager
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[test]
    fn test_create_find_drop() {
        let dir = utils::test_dir("db_basic");
        let db = Db::open(&dir).unwrap();
        db.create_table(
            "t",
            &[
                ("id".to_string(), AttrType::Ints, 4),
                ("name".to_string(), AttrType::Chars, 8),
            ],
        )
        .unwrap();
        assert!(matches!(
            db.create_table("t", &[("id".to_string(), AttrType::Ints, 4)]),
            Err(DbError::SchemaTableExist(_))
        ));
        assert!(db.find_table("t").is_ok());
        assert_eq!(db.table_names(), vec!["t".to_string()]);

        db.drop_table("t").unwrap();
        assert!(matches!(
            db.find_table("t"),
            Err(DbError::SchemaTableNotExist(_))
        ));
        assert!(matches!(
            db.drop_table("t"),
            Err(DbError::SchemaTableNotExist(_))
        ));
    }

    #[test]
    fn test_tables_reopen_with_stable_ids() {
        let dir = utils::test_dir("db_reopen");
        {
            let db = Db::open(&dir).unwrap();
            db.create_table("a", &[("x".to_string(), AttrType::Ints, 4)])
                .unwrap();
            db.create_table("b", &[("y".to_string(), AttrType::Ints, 4)])
                .unwrap();
            db.sync_all().unwrap();
        }
        let db = Db::open(&dir).unwrap();
        let id_a = db.find_table("a").unwrap().table_id();
        let id_b = db.find_table("b").unwrap().table_id();
        assert_ne!(id_a, id_b);

        let c = db
            .create_table("c", &[("z".to_string(), AttrType::Ints, 4)])
            .unwrap();
        assert!(c.table_id() > id_a.max(id_b));
    }
}
