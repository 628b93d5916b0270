use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::error::{io_read_err, io_write_err};
use crate::common::{AttrType, DbError, DbResult, Rid, Value};
use crate::config::{MAX_COL_NAME_SIZE, TABLE_DATA_SUFFIX, TABLE_INDEX_SUFFIX, TABLE_META_SUFFIX};
use crate::storage::buffer_pool::BufferPoolManager;
use crate::storage::index::BplusTreeIndex;
use crate::storage::record::{Record, RecordFileHandler, RecordFileScanner};

pub const TRX_XID_BEGIN: &str = "__trx_xid_begin";
pub const TRX_XID_END: &str = "__trx_xid_end";

/// One column: name, type, and its fixed slice of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub attr_type: AttrType,
    pub offset: usize,
    pub len: usize,
    /// system fields are skipped by `SELECT *`
    pub visible: bool,
}

impl FieldMeta {
    pub fn fixed_len(attr_type: AttrType, declared_len: usize) -> usize {
        match attr_type {
            AttrType::Ints | AttrType::Floats => 4,
            AttrType::Booleans => 1,
            AttrType::Chars => declared_len.max(1),
            AttrType::Undefined => 0,
        }
    }

    pub fn get_value(&self, record: &[u8]) -> Value {
        let bytes = &record[self.offset..self.offset + self.len];
        match self.attr_type {
            AttrType::Ints => Value::Int(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            AttrType::Floats => Value::Float(f32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            AttrType::Booleans => Value::Bool(bytes[0] != 0),
            AttrType::Chars => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                Value::Chars(String::from_utf8_lossy(&bytes[..end]).to_string())
            }
            AttrType::Undefined => Value::Undefined,
        }
    }

    pub fn set_value(&self, record: &mut [u8], value: &Value) -> DbResult<()> {
        let bytes = &mut record[self.offset..self.offset + self.len];
        match (self.attr_type, value) {
            (AttrType::Ints, Value::Int(v)) => bytes.copy_from_slice(&v.to_le_bytes()),
            (AttrType::Floats, Value::Float(v)) => bytes.copy_from_slice(&v.to_le_bytes()),
            (AttrType::Booleans, Value::Bool(v)) => bytes[0] = *v as u8,
            (AttrType::Chars, Value::Chars(s)) => {
                if s.len() > self.len {
                    return Err(DbError::InvalidArgument(format!(
                        "value too long for field {} ({} > {})",
                        self.name,
                        s.len(),
                        self.len
                    )));
                }
                bytes.fill(0);
                bytes[..s.len()].copy_from_slice(s.as_bytes());
            }
            _ => {
                return Err(DbError::SchemaFieldTypeMismatch(format!(
                    "field {} is {}, value is {}",
                    self.name,
                    self.attr_type,
                    value.attr_type()
                )));
            }
        }
        Ok(())
    }

    pub fn set_int(&self, record: &mut [u8], v: i32) {
        record[self.offset..self.offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn get_int(&self, record: &[u8]) -> i32 {
        i32::from_le_bytes(
            record[self.offset..self.offset + 4]
                .try_into()
                .unwrap(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub field: String,
}

/// Schema of one table: system fields first, then the user's fields in
/// declaration order. Persisted as a JSON document next to the data
/// file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub table_id: i32,
    pub name: String,
    pub fields: Vec<FieldMeta>,
    pub indexes: Vec<IndexMeta>,
    pub record_size: usize,
}

/// The two hidden MVCC fields every table starts with.
pub fn sys_fields() -> Vec<(String, AttrType, usize)> {
    vec![
        (TRX_XID_BEGIN.to_string(), AttrType::Ints, 4),
        (TRX_XID_END.to_string(), AttrType::Ints, 4),
    ]
}

impl TableMeta {
    pub fn new(
        table_id: i32,
        name: &str,
        user_fields: &[(String, AttrType, usize)],
    ) -> DbResult<Self> {
        if user_fields.is_empty() {
            return Err(DbError::InvalidArgument(format!(
                "table {} has no fields",
                name
            )));
        }
        let mut fields = Vec::new();
        let mut offset = 0usize;
        for (visible, (field_name, attr_type, declared_len)) in sys_fields()
            .iter()
            .map(|f| (false, f))
            .chain(user_fields.iter().map(|f| (true, f)))
        {
            if field_name.len() > MAX_COL_NAME_SIZE {
                return Err(DbError::InvalidArgument(format!(
                    "field name too long: {}",
                    field_name
                )));
            }
            if visible && fields.iter().any(|f: &FieldMeta| &f.name == field_name) {
                return Err(DbError::InvalidArgument(format!(
                    "duplicated field name: {}",
                    field_name
                )));
            }
            let len = FieldMeta::fixed_len(*attr_type, *declared_len);
            if len == 0 {
                return Err(DbError::InvalidArgument(format!(
                    "field {} has undefined type",
                    field_name
                )));
            }
            fields.push(FieldMeta {
                name: field_name.clone(),
                attr_type: *attr_type,
                offset,
                len,
                visible,
            });
            offset += len;
        }
        Ok(Self {
            table_id,
            name: name.to_string(),
            fields,
            indexes: Vec::new(),
            record_size: offset,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.visible)
    }

    pub fn trx_fields(&self) -> (FieldMeta, FieldMeta) {
        let begin = self.field(TRX_XID_BEGIN).cloned();
        let end = self.field(TRX_XID_END).cloned();
        (
            begin.expect("table meta lost the begin xid field"),
            end.expect("table meta lost the end xid field"),
        )
    }

    pub fn index_on(&self, field: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.field == field)
    }
}

/// A table: schema, the record file, and the indexes kept in sync with
/// every record mutation.
pub struct Table {
    meta: RwLock<TableMeta>,
    record_handler: RecordFileHandler,
    indexes: RwLock<Vec<(IndexMeta, Arc<BplusTreeIndex>)>>,
    base_dir: PathBuf,
    manager: Arc<BufferPoolManager>,
}

pub fn meta_path(base_dir: &Path, table_name: &str) -> PathBuf {
    base_dir.join(format!("{}{}", table_name, TABLE_META_SUFFIX))
}

pub fn data_path(base_dir: &Path, table_name: &str) -> PathBuf {
    base_dir.join(format!("{}{}", table_name, TABLE_DATA_SUFFIX))
}

pub fn index_path(base_dir: &Path, table_name: &str, index_name: &str) -> PathBuf {
    base_dir.join(format!("{}-{}{}", table_name, index_name, TABLE_INDEX_SUFFIX))
}

impl Table {
    /// Create the on-disk artifacts for a new table and open it.
    pub fn create(
        manager: Arc<BufferPoolManager>,
        base_dir: &Path,
        meta: TableMeta,
    ) -> DbResult<Self> {
        let meta_file = meta_path(base_dir, &meta.name);
        if meta_file.exists() {
            return Err(DbError::SchemaTableExist(meta.name.clone()));
        }
        let data_file = data_path(base_dir, &meta.name);
        manager.create_file(&data_file)?;
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DbError::Internal(format!("serialize table meta: {}", e)))?;
        fs::write(&meta_file, json).map_err(|e| io_write_err("write table meta", e))?;
        info!("created table {} (id={})", meta.name, meta.table_id);
        Self::open_internal(manager, base_dir, meta)
    }

    /// Open an existing table from its meta file.
    pub fn open(
        manager: Arc<BufferPoolManager>,
        base_dir: &Path,
        table_name: &str,
    ) -> DbResult<Self> {
        let meta_file = meta_path(base_dir, table_name);
        let json = fs::read_to_string(&meta_file).map_err(|e| io_read_err("read table meta", e))?;
        let meta: TableMeta = serde_json::from_str(&json)
            .map_err(|e| DbError::Internal(format!("parse table meta: {}", e)))?;
        Self::open_internal(manager, base_dir, meta)
    }

    fn open_internal(
        manager: Arc<BufferPoolManager>,
        base_dir: &Path,
        meta: TableMeta,
    ) -> DbResult<Self> {
        let data_file = data_path(base_dir, &meta.name);
        let pool = manager.open_file(&data_file)?;
        let record_handler = RecordFileHandler::new(pool, meta.record_size)?;

        let mut indexes = Vec::new();
        for index_meta in &meta.indexes {
            let path = index_path(base_dir, &meta.name, &index_meta.name);
            let pool = manager.open_file(&path)?;
            let index = BplusTreeIndex::open(pool)?;
            indexes.push((index_meta.clone(), Arc::new(index)));
        }

        Ok(Self {
            meta: RwLock::new(meta),
            record_handler,
            indexes: RwLock::new(indexes),
            base_dir: base_dir.to_path_buf(),
            manager,
        })
    }

    pub fn table_id(&self) -> i32 {
        self.meta.read().unwrap().table_id
    }

    pub fn name(&self) -> String {
        self.meta.read().unwrap().name.clone()
    }

    pub fn meta(&self) -> TableMeta {
        self.meta.read().unwrap().clone()
    }

    /// Assemble a record from user values: system fields zeroed, user
    /// fields validated and cast to the declared column types.
    pub fn make_record(&self, values: &[Value]) -> DbResult<Vec<u8>> {
        let meta = self.meta.read().unwrap();
        let user_fields: Vec<&FieldMeta> = meta.fields.iter().filter(|f| f.visible).collect();
        if values.len() != user_fields.len() {
            return Err(DbError::SchemaFieldMissing(format!(
                "table {} expects {} values, got {}",
                meta.name,
                user_fields.len(),
                values.len()
            )));
        }
        let mut record = vec![0u8; meta.record_size];
        for (field, value) in user_fields.iter().zip(values) {
            let cast = if value.attr_type() == field.attr_type {
                value.clone()
            } else {
                value.cast_to(field.attr_type).map_err(|_| {
                    DbError::SchemaFieldTypeMismatch(format!(
                        "field {} is {}, value is {}",
                        field.name,
                        field.attr_type,
                        value.attr_type()
                    ))
                })?
            };
            field.set_value(&mut record, &cast)?;
        }
        Ok(record)
    }

    /// Insert the record and every index entry. A failed index insert
    /// undoes everything done so far.
    pub fn insert_record(&self, data: &[u8]) -> DbResult<Rid> {
        let rid = self.record_handler.insert_record(data)?;

        let indexes = self.indexes.read().unwrap();
        let meta = self.meta.read().unwrap();
        for (i, (index_meta, index)) in indexes.iter().enumerate() {
            let field = meta.field(&index_meta.field).ok_or_else(|| {
                DbError::Internal(format!("index {} on unknown field", index_meta.name))
            })?;
            let key = field.get_value(data);
            if let Err(e) = index.insert_entry(&key, rid) {
                // unwind the entries inserted before the failure
                for (prev_meta, prev_index) in indexes.iter().take(i) {
                    if let Some(prev_field) = meta.field(&prev_meta.field) {
                        let _ = prev_index.delete_entry(&prev_field.get_value(data), rid);
                    }
                }
                let _ = self.record_handler.delete_record(&rid);
                return Err(e);
            }
        }
        Ok(rid)
    }

    /// Physically remove a record and its index entries.
    pub fn delete_record(&self, rid: &Rid) -> DbResult<()> {
        let record = self.record_handler.get_record(rid)?;
        let indexes = self.indexes.read().unwrap();
        let meta = self.meta.read().unwrap();
        for (index_meta, index) in indexes.iter() {
            if let Some(field) = meta.field(&index_meta.field) {
                let key = field.get_value(&record.data);
                let _ = index.delete_entry(&key, *rid);
            }
        }
        self.record_handler.delete_record(rid)
    }

    pub fn get_record(&self, rid: &Rid) -> DbResult<Record> {
        self.record_handler.get_record(rid)
    }

    pub fn visit_record<F>(&self, rid: &Rid, updater: F) -> DbResult<()>
    where
        F: FnOnce(&mut [u8]) -> bool,
    {
        self.record_handler.visit_record(rid, updater)
    }

    pub fn scanner(&self) -> RecordFileScanner {
        self.record_handler.scanner()
    }

    /// Build a secondary index, backfilling it from existing records.
    pub fn create_index(&self, index_name: &str, field_name: &str) -> DbResult<()> {
        {
            let meta = self.meta.read().unwrap();
            if meta.indexes.iter().any(|i| i.name == index_name) {
                return Err(DbError::SchemaIndexNameRepeat(index_name.to_string()));
            }
            if meta.field(field_name).is_none_or(|f| !f.visible) {
                return Err(DbError::SchemaFieldNotExist(format!(
                    "{}.{}",
                    meta.name, field_name
                )));
            }
        }

        let (table_name, field) = {
            let meta = self.meta.read().unwrap();
            (meta.name.clone(), meta.field(field_name).unwrap().clone())
        };
        let path = index_path(&self.base_dir, &table_name, index_name);
        self.manager.create_file(&path)?;
        let pool = self.manager.open_file(&path)?;
        let index = BplusTreeIndex::create(pool, field.attr_type, field.len)?;

        // backfill from whatever the table already holds
        let mut scanner = self.record_handler.scanner();
        loop {
            match scanner.next_record() {
                Ok(record) => {
                    index.insert_entry(&field.get_value(&record.data), record.rid)?;
                }
                Err(DbError::RecordEof) => break,
                Err(e) => return Err(e),
            }
        }
        drop(scanner);

        let index_meta = IndexMeta {
            name: index_name.to_string(),
            field: field_name.to_string(),
        };
        {
            let mut meta = self.meta.write().unwrap();
            meta.indexes.push(index_meta.clone());
            self.save_meta(&meta)?;
        }
        self.indexes
            .write()
            .unwrap()
            .push((index_meta, Arc::new(index)));
        info!("created index {} on {}.{}", index_name, table_name, field_name);
        Ok(())
    }

    pub fn find_index_on(&self, field_name: &str) -> Option<Arc<BplusTreeIndex>> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .iter()
            .find(|(m, _)| m.field == field_name)
            .map(|(_, i)| i.clone())
    }

    pub fn index_name_on(&self, field_name: &str) -> Option<String> {
        let indexes = self.indexes.read().unwrap();
        indexes
            .iter()
            .find(|(m, _)| m.field == field_name)
            .map(|(m, _)| m.name.clone())
    }

    fn save_meta(&self, meta: &TableMeta) -> DbResult<()> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| DbError::Internal(format!("serialize table meta: {}", e)))?;
        fs::write(meta_path(&self.base_dir, &meta.name), json)
            .map_err(|e| io_write_err("write table meta", e))
    }

    /// Flush this table's data and index pages.
    pub fn sync(&self) -> DbResult<()> {
        self.record_handler.pool().flush_all_pages()?;
        for (_, index) in self.indexes.read().unwrap().iter() {
            index.pool().flush_all_pages()?;
        }
        Ok(())
    }

    /// Close the table's files; the table object is unusable afterwards.
    pub fn close(&self) -> DbResult<()> {
        let data_file = self.record_handler.pool().file_name().to_string();
        let index_files: Vec<String> = {
            let indexes = self.indexes.read().unwrap();
            indexes
                .iter()
                .map(|(_, i)| i.pool().file_name().to_string())
                .collect()
        };
        self.indexes.write().unwrap().clear();
        for file in index_files {
            self.manager.close_file(&file)?;
        }
        self.manager.close_file(&data_file)
    }

    /// Remove the table's files from disk. Must run after `close`.
    pub fn destroy(&self) -> DbResult<()> {
        let meta = self.meta.read().unwrap();
        let _ = fs::remove_file(meta_path(&self.base_dir, &meta.name));
        let _ = fs::remove_file(data_path(&self.base_dir, &meta.name));
        for index in &meta.indexes {
            let _ = fs::remove_file(index_path(&self.base_dir, &meta.name, &index.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBLWR_MAX_PAGES;
    use crate::storage::dblwr::DoubleWriteBuffer;
    use crate::storage::wal::LogHandler;
    use crate::utils;

    fn setup(annot: &str) -> (Arc<BufferPoolManager>, PathBuf) {
        let dir = utils::test_dir(annot);
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr =
            Arc::new(DoubleWriteBuffer::open(&dir.join("test.dblwr"), DBLWR_MAX_PAGES).unwrap());
        (BufferPoolManager::new(log, dblwr, 256), dir)
    }

    fn people_meta(table_id: i32) -> TableMeta {
        TableMeta::new(
            table_id,
            "people",
            &[
                ("id".to_string(), AttrType::Ints, 4),
                ("name".to_string(), AttrType::Chars, 16),
                ("score".to_string(), AttrType::Floats, 4),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_meta_layout_sys_fields_first() {
        let meta = people_meta(1);
        assert_eq!(meta.fields[0].name, TRX_XID_BEGIN);
        assert_eq!(meta.fields[1].name, TRX_XID_END);
        assert_eq!(meta.fields[0].offset, 0);
        assert_eq!(meta.fields[1].offset, 4);
        assert_eq!(meta.field("id").unwrap().offset, 8);
        assert_eq!(meta.field("name").unwrap().len, 16);
        assert_eq!(meta.record_size, 8 + 4 + 16 + 4);
    }

    #[test]
    fn test_record_codec_round_trip() {
        let (manager, dir) = setup("table_codec");
        let table = Table::create(manager, &dir, people_meta(1)).unwrap();
        let record = table
            .make_record(&[
                Value::Int(7),
                Value::Chars("alice".to_string()),
                Value::Float(9.5),
            ])
            .unwrap();
        let meta = table.meta();
        assert_eq!(meta.field("id").unwrap().get_value(&record), Value::Int(7));
        assert_eq!(
            meta.field("name").unwrap().get_value(&record),
            Value::Chars("alice".to_string())
        );
        assert_eq!(
            meta.field("score").unwrap().get_value(&record),
            Value::Float(9.5)
        );
    }

    #[test]
    fn test_make_record_validates() {
        let (manager, dir) = setup("table_validate");
        let table = Table::create(manager, &dir, people_meta(1)).unwrap();
        assert!(matches!(
            table.make_record(&[Value::Int(1)]),
            Err(DbError::SchemaFieldMissing(_))
        ));
        // ints coerce into the float column
        assert!(
            table
                .make_record(&[
                    Value::Int(1),
                    Value::Chars("bob".to_string()),
                    Value::Int(3),
                ])
                .is_ok()
        );
    }

    #[test]
    fn test_index_stays_in_sync() {
        let (manager, dir) = setup("table_index");
        let table = Table::create(manager, &dir, people_meta(1)).unwrap();
        for i in 0..20 {
            let record = table
                .make_record(&[
                    Value::Int(i),
                    Value::Chars(format!("p{}", i)),
                    Value::Float(i as f32),
                ])
                .unwrap();
            table.insert_record(&record).unwrap();
        }
        table.create_index("i_id", "id").unwrap();

        // new inserts land in the backfilled index too
        let record = table
            .make_record(&[
                Value::Int(100),
                Value::Chars("late".to_string()),
                Value::Float(0.0),
            ])
            .unwrap();
        let rid = table.insert_record(&record).unwrap();

        let index = table.find_index_on("id").unwrap();
        let mut scanner = index
            .scan(Some(&Value::Int(100)), true, Some(&Value::Int(100)), true)
            .unwrap();
        let (_, found_rid) = scanner.next_entry().unwrap();
        assert_eq!(found_rid, rid);
        drop(scanner);

        table.delete_record(&rid).unwrap();
        let mut scanner = index
            .scan(Some(&Value::Int(100)), true, Some(&Value::Int(100)), true)
            .unwrap();
        assert!(matches!(scanner.next_entry(), Err(DbError::RecordEof)));
    }

    #[test]
    fn test_duplicate_index_name_rejected() {
        let (manager, dir) = setup("table_dup_idx");
        let table = Table::create(manager, &dir, people_meta(1)).unwrap();
        table.create_index("i_id", "id").unwrap();
        assert!(matches!(
            table.create_index("i_id", "score"),
            Err(DbError::SchemaIndexNameRepeat(_))
        ));
        assert!(matches!(
            table.create_index("i_nope", "nope"),
            Err(DbError::SchemaFieldNotExist(_))
        ));
    }
}
