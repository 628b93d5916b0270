use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::common::{DbError, DbResult};
use crate::config::{BIND_ADDR, MAX_REQUEST_LEN, PORT, UNIX_SOCKET_PATH};
use crate::execution::{SqlResult, execute_sql};
use crate::session::Session;
use crate::storage::db::Db;
use crate::transaction::MvccTrxKit;

use super::thread_pool::WorkingThreadPool;

/// Accept loop: single-threaded accepts on TCP (and optionally a unix
/// socket), each connection handed to a pool worker which runs the
/// session until the peer goes away.
pub fn serve(db: Arc<Db>, kit: Arc<MvccTrxKit>) -> DbResult<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("shutting down");
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to install the signal handler");
    }

    let pool = Arc::new(WorkingThreadPool::new());

    if !UNIX_SOCKET_PATH.is_empty() {
        let _ = std::fs::remove_file(UNIX_SOCKET_PATH);
        let listener = UnixListener::bind(UNIX_SOCKET_PATH)
            .map_err(|e| DbError::IoAccess(format!("bind {}: {}", UNIX_SOCKET_PATH, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| DbError::IoAccess(e.to_string()))?;
        let db = db.clone();
        let kit = kit.clone();
        let pool = pool.clone();
        let running = running.clone();
        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let db = db.clone();
                        let kit = kit.clone();
                        pool.spawn(move || {
                            let reader = match stream.try_clone() {
                                Ok(reader) => reader,
                                Err(e) => {
                                    warn!("failed to clone unix stream: {}", e);
                                    return;
                                }
                            };
                            handle_connection(reader, stream, db, kit);
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => {
                        warn!("unix accept failed: {}", e);
                        break;
                    }
                }
            }
        });
        info!("listening on unix socket {}", UNIX_SOCKET_PATH);
    }

    let listener = TcpListener::bind((BIND_ADDR, PORT))
        .map_err(|e| DbError::IoAccess(format!("bind {}:{}: {}", BIND_ADDR, PORT, e)))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| DbError::IoAccess(e.to_string()))?;
    info!("listening on {}:{}", BIND_ADDR, PORT);

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!("connection from {}", peer);
                let db = db.clone();
                let kit = kit.clone();
                pool.spawn(move || {
                    let reader = match stream.try_clone() {
                        Ok(reader) => reader,
                        Err(e) => {
                            warn!("failed to clone tcp stream: {}", e);
                            return;
                        }
                    };
                    handle_connection(reader, stream, db, kit);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                warn!("accept failed: {}", e);
            }
        }
    }

    db.sync_all()?;
    if !UNIX_SOCKET_PATH.is_empty() {
        let _ = std::fs::remove_file(UNIX_SOCKET_PATH);
    }
    Ok(())
}

/// One session: read a NUL-terminated SQL text, run it, write the
/// response, repeat. Any tear-down rolls the open transaction back.
pub fn handle_connection<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    db: Arc<Db>,
    kit: Arc<MvccTrxKit>,
) {
    let mut session = Session::new(db, kit);
    let mut reader = BufReader::new(reader);

    loop {
        match read_request(&mut reader) {
            Ok(Some(sql)) => {
                let result = execute_sql(&mut session, &sql);
                if write_response(&mut writer, &mut session, &result).is_err() {
                    break;
                }
                if result.disconnect {
                    break;
                }
            }
            Ok(None) => break, // peer closed
            Err(e) => {
                let result = SqlResult::with_error(e);
                let _ = write_response(&mut writer, &mut session, &result);
                break;
            }
        }
    }

    if session.trx_mut().is_started() {
        if let Err(e) = session.trx_mut().rollback() {
            warn!("rollback on disconnect failed: {}", e);
        }
    }
}

/// A request is everything up to a single `\0`, at most
/// MAX_REQUEST_LEN bytes. None at a clean end of stream.
fn read_request<R: BufRead>(reader: &mut R) -> DbResult<Option<String>> {
    let mut buf = Vec::new();
    let mut limited = reader.take((MAX_REQUEST_LEN + 1) as u64);
    let n = limited
        .read_until(0, &mut buf)
        .map_err(|e| DbError::IoRead(e.to_string()))?;
    if n == 0 {
        return Ok(None);
    }
    match buf.last() {
        Some(0) => {
            buf.pop();
        }
        _ if n > MAX_REQUEST_LEN => {
            return Err(DbError::IoTooLong(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_LEN
            )));
        }
        // stream ended without the terminator
        _ => {}
    }
    Ok(Some(String::from_utf8_lossy(&buf).to_string()))
}

/// Response: optional "# " debug lines, optional header line, data
/// rows, the status line, then the `\0` frame terminator. Cells are
/// joined with " | ".
fn write_response<W: Write>(
    writer: &mut W,
    session: &mut Session,
    result: &SqlResult,
) -> std::io::Result<()> {
    let mut out = String::new();
    for line in session.take_debug_lines() {
        out.push_str("# ");
        out.push_str(&line);
        out.push('\n');
    }
    if !result.headers.is_empty() {
        out.push_str(&result.headers.join(" | "));
        out.push('\n');
    }
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        out.push_str(&cells.join(" | "));
        out.push('\n');
    }
    out.push_str(&result.status_line());
    out.push('\n');

    writer.write_all(out.as_bytes())?;
    writer.write_all(&[0u8])?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    /// Drive a whole session through the framed protocol using
    /// in-memory pipes.
    fn roundtrip(requests: &[&str]) -> Vec<String> {
        let db = Db::open(&utils::test_dir("server_proto")).unwrap();
        let kit = MvccTrxKit::new();

        let mut input = Vec::new();
        for request in requests {
            input.extend_from_slice(request.as_bytes());
            input.push(0);
        }
        let mut output = Vec::new();
        handle_connection(&input[..], &mut output, db, kit);

        output
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect()
    }

    #[test]
    fn test_protocol_select_frames() {
        let responses = roundtrip(&[
            "CREATE TABLE t (id INT, name CHAR(8))",
            "INSERT INTO t VALUES (1, 'a')",
            "SELECT * FROM t",
            "SELEC oops",
        ]);
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0], "SUCCESS\n");
        assert_eq!(responses[1], "SUCCESS\n");
        assert_eq!(responses[2], "id | name\n1 | a\nSUCCESS\n");
        assert!(responses[3].starts_with("SQL_SYNTAX > "));
    }

    #[test]
    fn test_protocol_debug_lines() {
        let responses = roundtrip(&["SET sql_debug = 1", "SELECT 1 + 1"]);
        assert_eq!(responses[0], "SUCCESS\n");
        let lines: Vec<&str> = responses[1].lines().collect();
        assert!(lines[0].starts_with("# "));
        assert!(lines.contains(&"1+1"));
        assert!(lines.contains(&"2"));
        assert_eq!(*lines.last().unwrap(), "SUCCESS");
    }

    #[test]
    fn test_oversize_request_disconnects() {
        let huge = "SELECT ".to_string() + &"1,".repeat(MAX_REQUEST_LEN);
        let responses = roundtrip(&[&huge, "SELECT 1"]);
        // the over-long request gets an error and the connection ends
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("IOERR_TOO_LONG > "));
    }

    #[test]
    fn test_exit_ends_session() {
        let responses = roundtrip(&["EXIT", "SELECT 1"]);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0], "SUCCESS\n");
    }
}
