use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};

const ADDR: &str = "127.0.0.1:6789";

// global id source so repeated bench runs never collide on keys
static GLOBAL_ID: AtomicU64 = AtomicU64::new(100000);

/// One request over the text protocol: SQL, a NUL, then read the
/// response up to its NUL.
fn execute_query(stream: &mut TcpStream, sql: &str) -> String {
    stream.write_all(sql.as_bytes()).expect("send sql");
    stream.write_all(&[0u8]).expect("send terminator");
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == 0 => break,
            Ok(_) => response.push(byte[0]),
            Err(e) => panic!("read response: {}", e),
        }
    }
    String::from_utf8_lossy(&response).to_string()
}

fn connect() -> TcpStream {
    let stream = TcpStream::connect(ADDR).expect("connect to a running minidb server");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

fn setup_db(stream: &mut TcpStream) {
    execute_query(stream, "DROP TABLE bench_main");
    execute_query(stream, "DROP TABLE bench_orders");
    execute_query(
        stream,
        "CREATE TABLE bench_main (id INT, val CHAR(32), category INT)",
    );
    execute_query(
        stream,
        "CREATE TABLE bench_orders (oid INT, user_id INT, amount FLOAT)",
    );
    execute_query(stream, "CREATE INDEX i_bench_id ON bench_main (id)");

    for i in 1..=50 {
        execute_query(
            stream,
            &format!(
                "INSERT INTO bench_main VALUES ({}, 'val_{}', {})",
                i,
                i,
                i % 5
            ),
        );
        execute_query(
            stream,
            &format!(
                "INSERT INTO bench_orders VALUES ({}, {}, {}.5)",
                i,
                i,
                i
            ),
        );
    }
}

fn bench_db_suites(c: &mut Criterion) {
    let mut stream = connect();
    setup_db(&mut stream);

    let mut g1 = c.benchmark_group("Basic-Operations");
    g1.measurement_time(Duration::from_secs(5));

    g1.bench_function("point_select_indexed", |b| {
        b.iter(|| {
            execute_query(&mut stream, "SELECT * FROM bench_main WHERE id = 25");
        });
    });

    g1.bench_function("range_scan_simple", |b| {
        b.iter(|| {
            execute_query(
                &mut stream,
                "SELECT * FROM bench_main WHERE id > 20 AND id < 30",
            );
        });
    });

    g1.bench_function("insert_single", |b| {
        b.iter(|| {
            let id = GLOBAL_ID.fetch_add(1, Ordering::Relaxed);
            execute_query(
                &mut stream,
                &format!("INSERT INTO bench_main VALUES ({}, 'x', 0)", id),
            );
        });
    });
    g1.finish();

    let mut g2 = c.benchmark_group("Query-Shapes");
    g2.measurement_time(Duration::from_secs(5));

    g2.bench_function("group_by_sum", |b| {
        b.iter(|| {
            execute_query(
                &mut stream,
                "SELECT category, COUNT(*) FROM bench_main GROUP BY category",
            );
        });
    });

    g2.bench_function("join_two_tables", |b| {
        b.iter(|| {
            execute_query(
                &mut stream,
                "SELECT bench_main.val, bench_orders.amount FROM bench_main, bench_orders \
                 WHERE bench_main.id = bench_orders.oid AND bench_orders.amount > 40",
            );
        });
    });
    g2.finish();
}

criterion_group!(benches, bench_db_suites);
criterion_main!(benches);
