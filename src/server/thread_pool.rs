use rayon::ThreadPoolBuilder;
use tracing::info;

use crate::config::THREAD_MAXNUM;

/// Worker pool the connection handlers run on. Sized from the config,
/// or from the detected cpu count when the config says zero.
pub struct WorkingThreadPool {
    thread_pool: rayon::ThreadPool,
    max_thread_num: usize,
}

impl WorkingThreadPool {
    pub fn new() -> Self {
        let num_threads = if THREAD_MAXNUM == 0 {
            num_cpus::get()
        } else {
            THREAD_MAXNUM
        };
        info!("worker pool with {} threads", num_threads);
        Self {
            thread_pool: ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .expect("failed to build the worker pool"),
            max_thread_num: num_threads,
        }
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.thread_pool.spawn(f);
    }

    pub fn max_thread_num(&self) -> usize {
        self.max_thread_num
    }
}

impl Default for WorkingThreadPool {
    fn default() -> Self {
        Self::new()
    }
}
