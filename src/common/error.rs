use thiserror::Error;

/// Every fallible operation in minidb returns one of these codes.
/// The wire code (the string before " > " in a status line) comes from
/// [`DbError::code`]; the human readable part is the Display impl.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("failed to read: {0}")]
    IoRead(String),
    #[error("failed to write: {0}")]
    IoWrite(String),
    #[error("failed to seek: {0}")]
    IoSeek(String),
    #[error("failed to close: {0}")]
    IoClose(String),
    #[error("failed to access: {0}")]
    IoAccess(String),
    #[error("request too long: {0}")]
    IoTooLong(String),

    #[error("no buffer page available: {0}")]
    BufferPoolNoBuf(String),
    #[error("failed to open buffer pool: {0}")]
    BufferPoolOpen(String),
    #[error("invalid page num: {0}")]
    BufferPoolInvalidPageNum(String),

    #[error("database already exists: {0}")]
    SchemaDbExist(String),
    #[error("database does not exist: {0}")]
    SchemaDbNotExist(String),
    #[error("table already exists: {0}")]
    SchemaTableExist(String),
    #[error("table does not exist: {0}")]
    SchemaTableNotExist(String),
    #[error("field is missing: {0}")]
    SchemaFieldMissing(String),
    #[error("field does not exist: {0}")]
    SchemaFieldNotExist(String),
    #[error("field type mismatch: {0}")]
    SchemaFieldTypeMismatch(String),
    #[error("index name duplicated: {0}")]
    SchemaIndexNameRepeat(String),

    #[error("syntax error: {0}")]
    SqlSyntax(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not implemented: {0}")]
    Unimplemented(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no such variable: {0}")]
    VariableNotExists(String),
    #[error("invalid variable value: {0}")]
    VariableNotValid(String),

    #[error("no more record")]
    RecordEof,
    #[error("record invisible")]
    RecordInvisible,
    #[error("record does not exist: {0}")]
    RecordNotExist(String),
    #[error("duplicate key: {0}")]
    RecordDuplicateKey(String),
    #[error("concurrency conflict: {0}")]
    LockedConcurrencyConflict(String),
    #[error("unlocking a lock not held: {0}")]
    LockedUnlock(String),

    #[error("internal error: {0}")]
    Internal(String),
    #[error("out of memory: {0}")]
    Nomem(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("file does not exist: {0}")]
    FileNotExist(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Stable code string used in protocol status lines and logs.
    pub fn code(&self) -> &'static str {
        use DbError::*;
        match self {
            IoRead(_) => "IOERR_READ",
            IoWrite(_) => "IOERR_WRITE",
            IoSeek(_) => "IOERR_SEEK",
            IoClose(_) => "IOERR_CLOSE",
            IoAccess(_) => "IOERR_ACCESS",
            IoTooLong(_) => "IOERR_TOO_LONG",
            BufferPoolNoBuf(_) => "BUFFERPOOL_NOBUF",
            BufferPoolOpen(_) => "BUFFERPOOL_OPEN",
            BufferPoolInvalidPageNum(_) => "BUFFERPOOL_INVALID_PAGE_NUM",
            SchemaDbExist(_) => "SCHEMA_DB_EXIST",
            SchemaDbNotExist(_) => "SCHEMA_DB_NOT_EXIST",
            SchemaTableExist(_) => "SCHEMA_TABLE_EXIST",
            SchemaTableNotExist(_) => "SCHEMA_TABLE_NOT_EXIST",
            SchemaFieldMissing(_) => "SCHEMA_FIELD_MISSING",
            SchemaFieldNotExist(_) => "SCHEMA_FIELD_NOT_EXIST",
            SchemaFieldTypeMismatch(_) => "SCHEMA_FIELD_TYPE_MISMATCH",
            SchemaIndexNameRepeat(_) => "SCHEMA_INDEX_NAME_REPEAT",
            SqlSyntax(_) => "SQL_SYNTAX",
            InvalidArgument(_) => "INVALID_ARGUMENT",
            Unimplemented(_) => "UNIMPLEMENTED",
            Unsupported(_) => "UNSUPPORTED",
            VariableNotExists(_) => "VARIABLE_NOT_EXISTS",
            VariableNotValid(_) => "VARIABLE_NOT_VALID",
            RecordEof => "RECORD_EOF",
            RecordInvisible => "RECORD_INVISIBLE",
            RecordNotExist(_) => "RECORD_NOT_EXIST",
            RecordDuplicateKey(_) => "RECORD_DUPLICATE_KEY",
            LockedConcurrencyConflict(_) => "LOCKED_CONCURRENCY_CONFLICT",
            LockedUnlock(_) => "LOCKED_UNLOCK",
            Internal(_) => "INTERNAL",
            Nomem(_) => "NOMEM",
            NotFound(_) => "NOTFOUND",
            FileNotExist(_) => "FILE_NOT_EXIST",
        }
    }
}

/// Map an io::Error from a read path.
pub fn io_read_err(ctx: &str, e: std::io::Error) -> DbError {
    DbError::IoRead(format!("{}: {}", ctx, e))
}

/// Map an io::Error from a write path.
pub fn io_write_err(ctx: &str, e: std::io::Error) -> DbError {
    DbError::IoWrite(format!("{}: {}", ctx, e))
}

pub fn io_seek_err(ctx: &str, e: std::io::Error) -> DbError {
    DbError::IoSeek(format!("{}: {}", ctx, e))
}

pub fn io_access_err(ctx: &str, e: std::io::Error) -> DbError {
    DbError::IoAccess(format!("{}: {}", ctx, e))
}
