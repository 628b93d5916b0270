//! This file provides the configuration constants for minidb.
//! Caution: if you changed anyone below, make sure you have deleted
//! old database files before starting minidb, or it may cause some
//! unexpected errors.

pub const _NAME: &str = "minidb";
pub const _VERSION: &str = "0.1.0";

pub const BIND_ADDR: &str = "127.0.0.1";
pub const PORT: u16 = 6789;
/// Set to empty to disable the unix socket listener.
pub const UNIX_SOCKET_PATH: &str = "./minidb.sock";

pub const LOG_LEVEL: &str = "debug";
pub const LOG_PATH: &str = "./logs/minidb.log";

/// 0 means: size the worker pool from the detected cpu count.
pub const THREAD_MAXNUM: usize = 0;

pub const DB_DIR: &str = "./data";
pub const WAL_FILE_NAME: &str = "minidb.wal";
pub const DBLWR_FILE_NAME: &str = "minidb.dblwr";
pub const TABLE_META_SUFFIX: &str = ".meta.json";
pub const TABLE_DATA_SUFFIX: &str = ".data";
pub const TABLE_INDEX_SUFFIX: &str = ".index";

/// Whole page, including the page header.
pub const PAGE_SIZE_BYTES: usize = 8 * 1024; // 8 KiB
/// page_num(4) + lsn(8) + check_sum(4)
pub const PAGE_HEADER_BYTES: usize = 16;
pub const PAGE_DATA_BYTES: usize = PAGE_SIZE_BYTES - PAGE_HEADER_BYTES;

/// Number of frames shared by every buffer pool.
pub const FRAME_POOL_CAPACITY: usize = 1024;
/// How many cold frames one eviction pass tries to reclaim.
pub const FRAME_PURGE_BATCH: usize = 8;

/// Number of staged pages the double-write buffer holds before it
/// writes them through to their home files.
pub const DBLWR_MAX_PAGES: usize = 16;

/// A request is a SQL text terminated by '\0'.
pub const MAX_REQUEST_LEN: usize = 8 * 1024; // 8 KiB

pub const MAX_TABLE_NAME_SIZE: usize = 64;
pub const MAX_COL_NAME_SIZE: usize = 64;

/// Rows per columnar chunk.
pub const CHUNK_CAPACITY: usize = 2048;

/// Floats closer to zero than this are treated as zero.
pub const EPSILON: f32 = 1e-6;
