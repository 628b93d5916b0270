mod common;
mod config;
mod execution;
mod server;
mod session;
mod sql;
mod storage;
mod transaction;
mod utils;

use std::fs;
use std::path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::prelude::*;

use crate::common::DbResult;
use crate::storage::db::Db;
use crate::transaction::{MvccTrxKit, MvccTrxLogReplayer};

pub fn init_log() {
    let log_dir = path::Path::new(config::LOG_PATH).parent().unwrap();
    let log_filename = path::Path::new(config::LOG_PATH)
        .file_name()
        .unwrap()
        .to_str()
        .unwrap();
    fs::create_dir_all(log_dir).unwrap();

    let stdout_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_thread_names(true)
        .with_level(true);

    let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    Box::leak(Box::new(_guard));

    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config::LOG_LEVEL))
        .with(stdout_log)
        .with(file_log)
        .init();
}

/// Bring the database up: open every table, put torn pages right from
/// the double-write buffer, replay the log, finish interrupted
/// transactions. Must complete before the first connection is served.
fn init_database() -> DbResult<(Arc<Db>, Arc<MvccTrxKit>)> {
    info!("Initializing database...");
    let db = Db::open(path::Path::new(config::DB_DIR))?;
    let kit = MvccTrxKit::new();
    let trx_replayer = MvccTrxLogReplayer::new(db.clone(), kit.clone(), db.log_handler().clone());
    db.recover(&trx_replayer)?;
    info!("Database initialized successfully!");
    Ok((db, kit))
}

pub fn run() {
    init_log();
    let (db, kit) = init_database().expect("failed to initialize the database");
    server::serve(db, kit).expect("server failed");
}
