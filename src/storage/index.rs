use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::common::{AttrType, DbError, DbResult, PageNum, Rid, Value};
use crate::config::PAGE_DATA_BYTES;
use crate::storage::buffer_pool::DiskBufferPool;

/// Key stored in the tree: the user value disambiguated by the record
/// id, so duplicate user keys stay unique inside the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey {
    pub user_key: Value,
    pub rid: Rid,
}

impl IndexKey {
    fn cmp_key(&self, other: &IndexKey) -> Ordering {
        match self.user_key.compare(&other.user_key) {
            Some(Ordering::Equal) | None => self.rid.cmp(&other.rid),
            Some(ord) => ord,
        }
    }
}

#[derive(Debug, Clone)]
enum BTreeNode {
    Leaf {
        items: Vec<(IndexKey, Rid)>,
        next_page: PageNum,
    },
    Internal {
        // key = smallest key in the child's subtree
        items: Vec<(IndexKey, PageNum)>,
    },
}

const META_PAGE: PageNum = 1;

/// Index metadata kept in its own page: the root page number plus the
/// key type, so an index file is self-describing.
#[derive(Debug, Clone, Copy)]
struct IndexFileMeta {
    root_page: PageNum,
    attr_type: AttrType,
    attr_len: usize,
}

fn attr_type_tag(t: AttrType) -> u8 {
    match t {
        AttrType::Undefined => 0,
        AttrType::Chars => 1,
        AttrType::Ints => 2,
        AttrType::Floats => 3,
        AttrType::Booleans => 4,
    }
}

fn attr_type_from_tag(tag: u8) -> DbResult<AttrType> {
    Ok(match tag {
        0 => AttrType::Undefined,
        1 => AttrType::Chars,
        2 => AttrType::Ints,
        3 => AttrType::Floats,
        4 => AttrType::Booleans,
        _ => return Err(DbError::Internal(format!("bad attr type tag {}", tag))),
    })
}

fn value_to_key_bytes(value: &Value, attr_len: usize) -> Vec<u8> {
    match value {
        Value::Int(v) => v.to_le_bytes().to_vec(),
        Value::Float(v) => v.to_le_bytes().to_vec(),
        Value::Bool(v) => vec![*v as u8],
        Value::Chars(s) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.truncate(attr_len);
            bytes.resize(attr_len, 0);
            bytes
        }
        Value::Undefined => vec![0u8; attr_len],
    }
}

fn value_from_key_bytes(attr_type: AttrType, bytes: &[u8]) -> Value {
    match attr_type {
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

/// B+ tree over `(key, RID)` pairs in its own paged file.
///
/// Page 1 holds the tree metadata; every other allocated page is one
/// node. Leaves are chained for range scans. Deletion removes entries
/// without rebalancing; sparse nodes are reclaimed only when they empty
/// out completely.
pub struct BplusTreeIndex {
    pool: Arc<DiskBufferPool>,
    meta: Mutex<IndexFileMeta>,
}

impl BplusTreeIndex {
    fn key_bytes(meta: &IndexFileMeta) -> usize {
        match meta.attr_type {
            AttrType::Ints | AttrType::Floats => 4,
            AttrType::Booleans => 1,
            _ => meta.attr_len,
        }
    }

    /// Entries one node holds before it splits.
    fn max_items(meta: &IndexFileMeta) -> usize {
        let item_bytes = Self::key_bytes(meta) + 8 + 8; // key + rid + child/next
        ((PAGE_DATA_BYTES - 16) / item_bytes).clamp(4, 256)
    }

    /// Format a fresh index file: a meta page plus an empty root leaf.
    pub fn create(pool: Arc<DiskBufferPool>, attr_type: AttrType, attr_len: usize) -> DbResult<Self> {
        let meta_frame = pool.allocate_page()?;
        if meta_frame.page_num() != META_PAGE {
            pool.unpin_page(&meta_frame);
            return Err(DbError::Internal(format!(
                "index meta page landed on page {}",
                meta_frame.page_num()
            )));
        }
        let root_frame = pool.allocate_page()?;
        let root_page = root_frame.page_num();

        let meta = IndexFileMeta {
            root_page,
            attr_type,
            attr_len,
        };
        let index = Self {
            pool: pool.clone(),
            meta: Mutex::new(meta),
        };
        index.store_node(
            root_page,
            &BTreeNode::Leaf {
                items: Vec::new(),
                next_page: 0,
            },
            &meta,
        )?;
        pool.unpin_page(&root_frame);

        Self::store_meta(&meta_frame, &meta);
        pool.unpin_page(&meta_frame);
        Ok(index)
    }

    pub fn open(pool: Arc<DiskBufferPool>) -> DbResult<Self> {
        let frame = pool.get_page(META_PAGE)?;
        let meta = {
            let page = frame.page();
            IndexFileMeta {
                root_page: i32::from_le_bytes(page.data[0..4].try_into().unwrap()),
                attr_type: attr_type_from_tag(page.data[4])?,
                attr_len: i32::from_le_bytes(page.data[5..9].try_into().unwrap()) as usize,
            }
        };
        pool.unpin_page(&frame);
        Ok(Self {
            pool,
            meta: Mutex::new(meta),
        })
    }

    fn store_meta(frame: &Arc<crate::storage::frame::Frame>, meta: &IndexFileMeta) {
        let mut page = frame.page_mut_dirty();
        page.data[0..4].copy_from_slice(&meta.root_page.to_le_bytes());
        page.data[4] = attr_type_tag(meta.attr_type);
        page.data[5..9].copy_from_slice(&(meta.attr_len as i32).to_le_bytes());
    }

    fn save_meta(&self, meta: &IndexFileMeta) -> DbResult<()> {
        let frame = self.pool.get_page(META_PAGE)?;
        Self::store_meta(&frame, meta);
        self.pool.unpin_page(&frame);
        Ok(())
    }

    fn load_node(&self, page_num: PageNum, meta: &IndexFileMeta) -> DbResult<BTreeNode> {
        let frame = self.pool.get_page(page_num)?;
        let node = {
            let page = frame.page();
            let data = &page.data;
            let node_type = data[0];
            let count = u16::from_le_bytes(data[1..3].try_into().unwrap()) as usize;
            let key_bytes = Self::key_bytes(meta);
            match node_type {
                0 => {
                    let next_page = i32::from_le_bytes(data[3..7].try_into().unwrap());
                    let mut items = Vec::with_capacity(count);
                    let mut off = 7;
                    for _ in 0..count {
                        let user_key =
                            value_from_key_bytes(meta.attr_type, &data[off..off + key_bytes]);
                        off += key_bytes;
                        let page = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                        let slot = i32::from_le_bytes(data[off + 4..off + 8].try_into().unwrap());
                        off += 8;
                        let rid = Rid::new(page, slot);
                        items.push((IndexKey { user_key, rid }, rid));
                    }
                    BTreeNode::Leaf { items, next_page }
                }
                1 => {
                    let mut items = Vec::with_capacity(count);
                    let mut off = 3;
                    for _ in 0..count {
                        let user_key =
                            value_from_key_bytes(meta.attr_type, &data[off..off + key_bytes]);
                        off += key_bytes;
                        let page = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                        let slot = i32::from_le_bytes(data[off + 4..off + 8].try_into().unwrap());
                        let rid = Rid::new(page, slot);
                        off += 8;
                        let child = i32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                        off += 4;
                        items.push((IndexKey { user_key, rid }, child));
                    }
                    BTreeNode::Internal { items }
                }
                t => {
                    return Err(DbError::Internal(format!(
                        "bad index node type {} on page {}",
                        t, page_num
                    )));
                }
            }
        };
        self.pool.unpin_page(&frame);
        Ok(node)
    }

    fn store_node(&self, page_num: PageNum, node: &BTreeNode, meta: &IndexFileMeta) -> DbResult<()> {
        let key_bytes = Self::key_bytes(meta);
        let frame = self.pool.get_page(page_num)?;
        {
            let mut page = frame.page_mut_dirty();
            let data = &mut page.data;
            data.fill(0);
            match node {
                BTreeNode::Leaf { items, next_page } => {
                    data[0] = 0;
                    data[1..3].copy_from_slice(&(items.len() as u16).to_le_bytes());
                    data[3..7].copy_from_slice(&next_page.to_le_bytes());
                    let mut off = 7;
                    for (key, rid) in items {
                        data[off..off + key_bytes]
                            .copy_from_slice(&value_to_key_bytes(&key.user_key, meta.attr_len));
                        off += key_bytes;
                        data[off..off + 4].copy_from_slice(&rid.page_num.to_le_bytes());
                        data[off + 4..off + 8].copy_from_slice(&rid.slot_num.to_le_bytes());
                        off += 8;
                    }
                }
                BTreeNode::Internal { items } => {
                    data[0] = 1;
                    data[1..3].copy_from_slice(&(items.len() as u16).to_le_bytes());
                    let mut off = 3;
                    for (key, child) in items {
                        data[off..off + key_bytes]
                            .copy_from_slice(&value_to_key_bytes(&key.user_key, meta.attr_len));
                        off += key_bytes;
                        data[off..off + 4].copy_from_slice(&key.rid.page_num.to_le_bytes());
                        data[off + 4..off + 8].copy_from_slice(&key.rid.slot_num.to_le_bytes());
                        off += 8;
                        data[off..off + 4].copy_from_slice(&child.to_le_bytes());
                        off += 4;
                    }
                }
            }
        }
        self.pool.unpin_page(&frame);
        Ok(())
    }

    /// Path from the root to the leaf that owns `key`, parents first.
    fn descend(&self, key: &IndexKey, meta: &IndexFileMeta) -> DbResult<Vec<(PageNum, BTreeNode)>> {
        let mut path = Vec::new();
        let mut page_num = meta.root_page;
        loop {
            let node = self.load_node(page_num, meta)?;
            match &node {
                BTreeNode::Leaf { .. } => {
                    path.push((page_num, node));
                    return Ok(path);
                }
                BTreeNode::Internal { items } => {
                    if items.is_empty() {
                        return Err(DbError::Internal(format!(
                            "empty internal node on page {}",
                            page_num
                        )));
                    }
                    // last child whose smallest key is <= the target
                    let mut child = items[0].1;
                    for (item_key, item_child) in items {
                        if item_key.cmp_key(key) == Ordering::Greater {
                            break;
                        }
                        child = *item_child;
                    }
                    path.push((page_num, node));
                    page_num = child;
                }
            }
        }
    }

    pub fn insert_entry(&self, user_key: &Value, rid: Rid) -> DbResult<()> {
        let mut meta = self.meta.lock().unwrap();
        let user_key = user_key.cast_to(meta.attr_type)?;
        let key = IndexKey {
            user_key,
            rid,
        };
        let max_items = Self::max_items(&meta);

        let mut path = self.descend(&key, &meta)?;
        let (leaf_page, leaf_node) = path.pop().unwrap();

        let BTreeNode::Leaf {
            mut items,
            next_page,
        } = leaf_node
        else {
            return Err(DbError::Internal("descend ended on internal node".into()));
        };
        let pos = items
            .binary_search_by(|(k, _)| k.cmp_key(&key))
            .unwrap_or_else(|p| p);
        if items.get(pos).is_some_and(|(k, _)| k.cmp_key(&key) == Ordering::Equal) {
            return Err(DbError::RecordDuplicateKey(format!(
                "{} at {}",
                key.user_key, rid
            )));
        }
        items.insert(pos, (key.clone(), rid));

        if items.len() <= max_items {
            return self.store_node(leaf_page, &BTreeNode::Leaf { items, next_page }, &meta);
        }

        // split the leaf, then push separators up the path
        let right_items = items.split_off(items.len() / 2);
        let right_frame = self.pool.allocate_page()?;
        let right_page = right_frame.page_num();
        self.pool.unpin_page(&right_frame);

        let right_first = right_items[0].0.clone();
        self.store_node(
            right_page,
            &BTreeNode::Leaf {
                items: right_items,
                next_page,
            },
            &meta,
        )?;
        self.store_node(
            leaf_page,
            &BTreeNode::Leaf {
                items,
                next_page: right_page,
            },
            &meta,
        )?;

        let mut promoted = (right_first, right_page);
        let mut child_page = leaf_page;
        while let Some((page_num, node)) = path.pop() {
            let BTreeNode::Internal { mut items } = node else {
                return Err(DbError::Internal("leaf inside the descent path".into()));
            };
            let pos = items
                .iter()
                .position(|(_, c)| *c == child_page)
                .map(|p| p + 1)
                .unwrap_or(items.len());
            items.insert(pos, (promoted.0.clone(), promoted.1));

            if items.len() <= max_items {
                return self.store_node(page_num, &BTreeNode::Internal { items }, &meta);
            }
            let right_items = items.split_off(items.len() / 2);
            let right_frame = self.pool.allocate_page()?;
            let right_page = right_frame.page_num();
            self.pool.unpin_page(&right_frame);

            let right_first = right_items[0].0.clone();
            self.store_node(right_page, &BTreeNode::Internal { items: right_items }, &meta)?;
            self.store_node(page_num, &BTreeNode::Internal { items }, &meta)?;
            promoted = (right_first, right_page);
            child_page = page_num;
        }

        // the root split: grow the tree by one level
        let old_root = meta.root_page;
        let new_root_frame = self.pool.allocate_page()?;
        let new_root_page = new_root_frame.page_num();
        self.pool.unpin_page(&new_root_frame);

        let left_first = self.smallest_key(old_root, &meta)?;
        self.store_node(
            new_root_page,
            &BTreeNode::Internal {
                items: vec![(left_first, old_root), (promoted.0, promoted.1)],
            },
            &meta,
        )?;
        meta.root_page = new_root_page;
        self.save_meta(&meta)
    }

    fn smallest_key(&self, page_num: PageNum, meta: &IndexFileMeta) -> DbResult<IndexKey> {
        match self.load_node(page_num, meta)? {
            BTreeNode::Leaf { items, .. } => items
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| DbError::Internal("empty node in split path".into())),
            BTreeNode::Internal { items } => items
                .first()
                .map(|(k, _)| k.clone())
                .ok_or_else(|| DbError::Internal("empty node in split path".into())),
        }
    }

    pub fn delete_entry(&self, user_key: &Value, rid: Rid) -> DbResult<()> {
        let meta = self.meta.lock().unwrap();
        let user_key = user_key.cast_to(meta.attr_type)?;
        let key = IndexKey { user_key, rid };

        let mut path = self.descend(&key, &meta)?;
        let (leaf_page, leaf_node) = path.pop().unwrap();
        let BTreeNode::Leaf {
            mut items,
            next_page,
        } = leaf_node
        else {
            return Err(DbError::Internal("descend ended on internal node".into()));
        };
        match items.binary_search_by(|(k, _)| k.cmp_key(&key)) {
            Ok(pos) => {
                items.remove(pos);
                self.store_node(leaf_page, &BTreeNode::Leaf { items, next_page }, &meta)
            }
            Err(_) => Err(DbError::RecordNotExist(format!(
                "index entry {} at {}",
                key.user_key, rid
            ))),
        }
    }

    /// Range scan; either bound may be absent (open interval).
    pub fn scan(
        &self,
        low: Option<&Value>,
        low_inclusive: bool,
        high: Option<&Value>,
        high_inclusive: bool,
    ) -> DbResult<IndexScanner<'_>> {
        let meta = *self.meta.lock().unwrap();
        let high_bound = match high {
            Some(v) => Some((v.cast_to(meta.attr_type)?, high_inclusive)),
            None => None,
        };

        // find the starting leaf and position
        let (leaf, pos) = match low {
            Some(v) => {
                let low_cast = v.cast_to(meta.attr_type)?;
                let probe = IndexKey {
                    user_key: low_cast.clone(),
                    rid: if low_inclusive {
                        Rid::new(i32::MIN, i32::MIN)
                    } else {
                        Rid::new(i32::MAX, i32::MAX)
                    },
                };
                let mut path = self.descend(&probe, &meta)?;
                let (_, node) = path.pop().unwrap();
                let BTreeNode::Leaf { items, .. } = &node else {
                    return Err(DbError::Internal("descend ended on internal node".into()));
                };
                let pos = items
                    .binary_search_by(|(k, _)| k.cmp_key(&probe))
                    .map(|p| p + 1)
                    .unwrap_or_else(|p| p);
                (node, pos)
            }
            None => {
                // leftmost leaf
                let mut page_num = meta.root_page;
                loop {
                    match self.load_node(page_num, &meta)? {
                        node @ BTreeNode::Leaf { .. } => break (node, 0),
                        BTreeNode::Internal { items } => {
                            page_num = items
                                .first()
                                .map(|(_, c)| *c)
                                .ok_or_else(|| DbError::Internal("empty internal node".into()))?;
                        }
                    }
                }
            }
        };

        Ok(IndexScanner {
            index: self,
            meta,
            node: Some(leaf),
            pos,
            high: high_bound,
        })
    }

    pub fn pool(&self) -> &Arc<DiskBufferPool> {
        &self.pool
    }

    pub fn attr_type(&self) -> AttrType {
        self.meta.lock().unwrap().attr_type
    }
}

/// Walks the leaf chain in key order until the high bound stops it.
pub struct IndexScanner<'a> {
    index: &'a BplusTreeIndex,
    meta: IndexFileMeta,
    node: Option<BTreeNode>,
    pos: usize,
    high: Option<(Value, bool)>,
}

impl IndexScanner<'_> {
    pub fn next_entry(&mut self) -> DbResult<(Value, Rid)> {
        loop {
            let Some(BTreeNode::Leaf { items, next_page }) = &self.node else {
                return Err(DbError::RecordEof);
            };
            if self.pos >= items.len() {
                if *next_page == 0 {
                    self.node = None;
                    return Err(DbError::RecordEof);
                }
                let next = self.index.load_node(*next_page, &self.meta)?;
                self.node = Some(next);
                self.pos = 0;
                continue;
            }
            let (key, rid) = items[self.pos].clone();
            self.pos += 1;

            if let Some((bound, inclusive)) = &self.high {
                match key.user_key.compare(bound) {
                    Some(Ordering::Greater) => {
                        self.node = None;
                        return Err(DbError::RecordEof);
                    }
                    Some(Ordering::Equal) if !*inclusive => {
                        self.node = None;
                        return Err(DbError::RecordEof);
                    }
                    _ => {}
                }
            }
            return Ok((key.user_key, rid));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DBLWR_MAX_PAGES;
    use crate::storage::buffer_pool::BufferPoolManager;
    use crate::storage::dblwr::DoubleWriteBuffer;
    use crate::storage::wal::LogHandler;
    use crate::utils;

    fn setup(annot: &str) -> Arc<DiskBufferPool> {
        let dir = utils::test_dir(annot);
        let log = Arc::new(LogHandler::open(&dir.join("test.wal")).unwrap());
        let dblwr =
            Arc::new(DoubleWriteBuffer::open(&dir.join("test.dblwr"), DBLWR_MAX_PAGES).unwrap());
        let manager = BufferPoolManager::new(log, dblwr, 256);
        let path = dir.join("t.index");
        manager.create_file(&path).unwrap();
        manager.open_file(&path).unwrap()
    }

    #[test]
    fn test_point_lookup() {
        let pool = setup("idx_point");
        let index = BplusTreeIndex::create(pool, AttrType::Ints, 4).unwrap();
        for i in 0..100 {
            index.insert_entry(&Value::Int(i), Rid::new(1, i)).unwrap();
        }
        let mut scanner = index
            .scan(Some(&Value::Int(42)), true, Some(&Value::Int(42)), true)
            .unwrap();
        let (key, rid) = scanner.next_entry().unwrap();
        assert_eq!(key, Value::Int(42));
        assert_eq!(rid, Rid::new(1, 42));
        assert!(matches!(scanner.next_entry(), Err(DbError::RecordEof)));
    }

    #[test]
    fn test_range_scan_is_ordered_across_splits() {
        let pool = setup("idx_range");
        let index = BplusTreeIndex::create(pool, AttrType::Ints, 4).unwrap();
        // inserted in reverse, enough to force leaf splits
        let n = 2000;
        for i in (0..n).rev() {
            index.insert_entry(&Value::Int(i), Rid::new(1, i)).unwrap();
        }
        let mut scanner = index
            .scan(Some(&Value::Int(100)), true, Some(&Value::Int(1899)), true)
            .unwrap();
        let mut keys = Vec::new();
        loop {
            match scanner.next_entry() {
                Ok((key, _)) => keys.push(key.get_int()),
                Err(DbError::RecordEof) => break,
                Err(e) => panic!("scan failed: {}", e),
            }
        }
        assert_eq!(keys.len(), 1800);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys[0], 100);
        assert_eq!(*keys.last().unwrap(), 1899);
    }

    #[test]
    fn test_duplicate_user_keys_by_rid() {
        let pool = setup("idx_dup");
        let index = BplusTreeIndex::create(pool, AttrType::Ints, 4).unwrap();
        for slot in 0..5 {
            index
                .insert_entry(&Value::Int(7), Rid::new(2, slot))
                .unwrap();
        }
        // the same (key, rid) pair is refused
        assert!(matches!(
            index.insert_entry(&Value::Int(7), Rid::new(2, 0)),
            Err(DbError::RecordDuplicateKey(_))
        ));
        let mut scanner = index
            .scan(Some(&Value::Int(7)), true, Some(&Value::Int(7)), true)
            .unwrap();
        let mut count = 0;
        while scanner.next_entry().is_ok() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn test_delete_entry() {
        let pool = setup("idx_del");
        let index = BplusTreeIndex::create(pool, AttrType::Ints, 4).unwrap();
        for i in 0..10 {
            index.insert_entry(&Value::Int(i), Rid::new(1, i)).unwrap();
        }
        index.delete_entry(&Value::Int(5), Rid::new(1, 5)).unwrap();
        assert!(matches!(
            index.delete_entry(&Value::Int(5), Rid::new(1, 5)),
            Err(DbError::RecordNotExist(_))
        ));
        let mut scanner = index.scan(None, true, None, true).unwrap();
        let mut keys = Vec::new();
        while let Ok((key, _)) = scanner.next_entry() {
            keys.push(key.get_int());
        }
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    }

    #[test]
    fn test_chars_keys() {
        let pool = setup("idx_chars");
        let index = BplusTreeIndex::create(pool, AttrType::Chars, 16).unwrap();
        for (i, name) in ["delta", "alpha", "charlie", "bravo"].iter().enumerate() {
            index
                .insert_entry(&Value::Chars(name.to_string()), Rid::new(1, i as i32))
                .unwrap();
        }
        let mut scanner = index.scan(None, true, None, true).unwrap();
        let mut names = Vec::new();
        while let Ok((key, _)) = scanner.next_entry() {
            names.push(key.get_string());
        }
        assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta"]);
    }

    #[test]
    fn test_reopen_persists() {
        let pool = setup("idx_reopen");
        {
            let index = BplusTreeIndex::create(pool.clone(), AttrType::Ints, 4).unwrap();
            for i in 0..50 {
                index.insert_entry(&Value::Int(i), Rid::new(3, i)).unwrap();
            }
        }
        let index = BplusTreeIndex::open(pool).unwrap();
        let mut scanner = index
            .scan(Some(&Value::Int(10)), true, Some(&Value::Int(12)), true)
            .unwrap();
        let mut keys = Vec::new();
        while let Ok((key, _)) = scanner.next_entry() {
            keys.push(key.get_int());
        }
        assert_eq!(keys, vec![10, 11, 12]);
    }
}
