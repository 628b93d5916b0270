use std::path::PathBuf;
use std::sync::OnceLock;

static TEST_RUN_ID: OnceLock<u64> = OnceLock::new();

/// Per-test working directory, unique per test binary run and per thread
/// so parallel tests never share database files.
pub(crate) fn test_dir(annot: &str) -> PathBuf {
    let run_id = TEST_RUN_ID.get_or_init(rand::random::<u64>);

    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("unknown");
    let safe_thread_name = thread_name.replace("::", "_");

    // temp/minidb_test/run_{id}/{test_function}/{annot}
    let path = std::env::temp_dir()
        .join("minidb_test")
        .join(format!("run_{}", run_id))
        .join(safe_thread_name)
        .join(annot);
    if let Err(e) = std::fs::create_dir_all(&path) {
        eprintln!("Failed to create test directory {:?}: {}", path, e);
    }
    path
}
