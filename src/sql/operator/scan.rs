use std::sync::Arc;

use crate::common::{AttrType, DbError, DbResult, ReadWriteMode, Rid, Value};
use crate::sql::expr::chunk::Chunk;
use crate::sql::expr::expression::Expression;
use crate::sql::expr::tuple::{Tuple, TupleCellSpec};
use crate::sql::operator::{ExecutionContext, PhysicalOperator};
use crate::storage::index::BplusTreeIndex;
use crate::storage::record::RecordFileScanner;
use crate::storage::table::{FieldMeta, Table, TableMeta};

/// Row-at-a-time full table scan with MVCC visibility and the pushed
/// predicate conjuncts applied per record.
pub struct TableScanOper {
    table: Arc<Table>,
    mode: ReadWriteMode,
    predicates: Vec<Expression>,
    meta: TableMeta,
    visible_fields: Arc<Vec<FieldMeta>>,
    scanner: Option<RecordFileScanner>,
}

impl TableScanOper {
    pub fn new(table: Arc<Table>, mode: ReadWriteMode, predicates: Vec<Expression>) -> Self {
        let meta = table.meta();
        let visible_fields = Arc::new(meta.visible_fields().cloned().collect::<Vec<_>>());
        Self {
            table,
            mode,
            predicates,
            meta,
            visible_fields,
            scanner: None,
        }
    }

    fn passes(&self, tuple: &Tuple) -> DbResult<bool> {
        for predicate in &self.predicates {
            if !predicate.get_value(tuple)?.get_boolean() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl PhysicalOperator for TableScanOper {
    fn name(&self) -> String {
        format!("TABLE_SCAN({})", self.meta.name)
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.scanner = Some(self.table.scanner());
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        loop {
            let scanner = self
                .scanner
                .as_mut()
                .ok_or_else(|| DbError::Internal("scan next before open".to_string()))?;
            let record = match scanner.next_record() {
                Ok(record) => record,
                Err(DbError::RecordEof) => return Ok(None),
                Err(e) => return Err(e),
            };
            match ctx.trx.visit_record(&self.meta, &record.data, self.mode) {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            let tuple = Tuple::Row {
                table: self.meta.name.clone(),
                fields: self.visible_fields.clone(),
                record: record.data,
                rid: record.rid,
            };
            if self.passes(&tuple)? {
                return Ok(Some(tuple));
            }
        }
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.scanner = None;
        Ok(())
    }
}

/// Columnar table scan: fills chunks of visible fields, then masks
/// them with the pushed predicates through the selection vector.
pub struct TableScanVecOper {
    table: Arc<Table>,
    predicates: Vec<Expression>,
    meta: TableMeta,
    visible_fields: Vec<FieldMeta>,
    scanner: Option<RecordFileScanner>,
}

impl TableScanVecOper {
    pub fn new(table: Arc<Table>, predicates: Vec<Expression>) -> Self {
        let meta = table.meta();
        let visible_fields = meta.visible_fields().cloned().collect::<Vec<_>>();
        Self {
            table,
            predicates,
            meta,
            visible_fields,
            scanner: None,
        }
    }
}

impl PhysicalOperator for TableScanVecOper {
    fn name(&self) -> String {
        format!("TABLE_SCAN_VEC({})", self.meta.name)
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.scanner = Some(self.table.scanner());
        Ok(())
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        Err(DbError::Unsupported(
            "vectorized scan has no row path".to_string(),
        ))
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.scanner = None;
        Ok(())
    }

    fn next_chunk(&mut self, ctx: &mut ExecutionContext, chunk: &mut Chunk) -> DbResult<bool> {
        let scanner = self
            .scanner
            .as_mut()
            .ok_or_else(|| DbError::Internal("scan next before open".to_string()))?;
        chunk.reset();

        while !chunk.is_full() {
            let record = match scanner.next_record() {
                Ok(record) => record,
                Err(DbError::RecordEof) => break,
                Err(e) => return Err(e),
            };
            match ctx
                .trx
                .visit_record(&self.meta, &record.data, ReadWriteMode::ReadOnly)
            {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            let values: Vec<Value> = self
                .visible_fields
                .iter()
                .map(|f| f.get_value(&record.data))
                .collect();
            chunk.push_row(&values)?;
        }
        if chunk.rows() == 0 {
            return Ok(false);
        }
        let mut select = std::mem::take(&mut chunk.select);
        for predicate in &self.predicates {
            predicate.eval_predicate(chunk, &mut select)?;
        }
        chunk.select = select;
        Ok(true)
    }

    fn chunk_schema(&self) -> Option<(Vec<TupleCellSpec>, Vec<AttrType>)> {
        let specs = self
            .visible_fields
            .iter()
            .map(|f| TupleCellSpec::with_table(&self.meta.name, &f.name))
            .collect();
        let types = self.visible_fields.iter().map(|f| f.attr_type).collect();
        Some((specs, types))
    }
}

/// Point/range scan over a B+ tree index. The matching record ids are
/// collected at open, then records are fetched, checked for visibility
/// and filtered like a table scan.
pub struct IndexScanOper {
    table: Arc<Table>,
    index: Arc<BplusTreeIndex>,
    index_name: String,
    mode: ReadWriteMode,
    low: Value,
    high: Value,
    predicates: Vec<Expression>,
    meta: TableMeta,
    visible_fields: Arc<Vec<FieldMeta>>,
    rids: Vec<Rid>,
    pos: usize,
}

impl IndexScanOper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: Arc<Table>,
        index: Arc<BplusTreeIndex>,
        index_name: String,
        mode: ReadWriteMode,
        low: Value,
        high: Value,
        predicates: Vec<Expression>,
    ) -> Self {
        let meta = table.meta();
        let visible_fields = Arc::new(meta.visible_fields().cloned().collect::<Vec<_>>());
        Self {
            table,
            index,
            index_name,
            mode,
            low,
            high,
            predicates,
            meta,
            visible_fields,
            rids: Vec::new(),
            pos: 0,
        }
    }
}

impl PhysicalOperator for IndexScanOper {
    fn name(&self) -> String {
        format!("INDEX_SCAN({} ON {})", self.index_name, self.meta.name)
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    fn open(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.rids.clear();
        self.pos = 0;
        let mut scanner = self.index.scan(Some(&self.low), true, Some(&self.high), true)?;
        loop {
            match scanner.next_entry() {
                Ok((_, rid)) => self.rids.push(rid),
                Err(DbError::RecordEof) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        while self.pos < self.rids.len() {
            let rid = self.rids[self.pos];
            self.pos += 1;
            let record = match self.table.get_record(&rid) {
                Ok(record) => record,
                // the row vanished between index read and fetch
                Err(DbError::RecordNotExist(_)) => continue,
                Err(e) => return Err(e),
            };
            match ctx.trx.visit_record(&self.meta, &record.data, self.mode) {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            let tuple = Tuple::Row {
                table: self.meta.name.clone(),
                fields: self.visible_fields.clone(),
                record: record.data,
                rid,
            };
            let mut passes = true;
            for predicate in &self.predicates {
                if !predicate.get_value(&tuple)?.get_boolean() {
                    passes = false;
                    break;
                }
            }
            if passes {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn close(&mut self, _ctx: &mut ExecutionContext) -> DbResult<()> {
        self.rids.clear();
        Ok(())
    }
}
