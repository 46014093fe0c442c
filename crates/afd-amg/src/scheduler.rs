//! Batch scheduling.
//!
//! Batches are independent: each lives in its own directory and carries
//! its own name/size buffers. They can run one after the other on the
//! daemon thread or on a rayon pool.

use afd_config::{log_amg_info, log_amg_warn, Scheduling};
use rayon::prelude::*;
use rayon::ThreadPool;

/// Upper bound for the default pool size
pub const MAX_PIPELINE_THREADS: usize = 8;

/// Default thread count: min(cpu_cores / 2, MAX_PIPELINE_THREADS)
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).clamp(1, MAX_PIPELINE_THREADS)
}

pub enum Scheduler {
    Sequential,
    Pool(ThreadPool),
}

impl Scheduler {
    /// Build the scheduler. A pool that cannot be created degrades to
    /// sequential processing.
    pub fn new(scheduling: Scheduling, threads: Option<usize>) -> Self {
        match scheduling {
            Scheduling::Sequential => Scheduler::Sequential,
            Scheduling::Pool => {
                let num_threads = threads.unwrap_or_else(default_thread_count);
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("amg-worker-{}", i))
                    .build()
                {
                    Ok(pool) => {
                        log_amg_info!("Batch pool ready", threads = num_threads);
                        Scheduler::Pool(pool)
                    }
                    Err(e) => {
                        log_amg_warn!("Cannot build batch pool, running sequentially", error = e.to_string());
                        Scheduler::Sequential
                    }
                }
            }
        }
    }

    pub fn threads(&self) -> usize {
        match self {
            Scheduler::Sequential => 1,
            Scheduler::Pool(pool) => pool.current_num_threads(),
        }
    }

    /// Apply `f` to every item; results keep the input order
    pub fn run<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        match self {
            Scheduler::Sequential => items.into_iter().map(f).collect(),
            Scheduler::Pool(pool) => pool.install(|| items.into_par_iter().map(f).collect()),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheduler::Sequential => write!(f, "Sequential"),
            Scheduler::Pool(pool) => write!(f, "Pool({})", pool.current_num_threads()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thread_count_bounds() {
        let n = default_thread_count();
        assert!((1..=MAX_PIPELINE_THREADS).contains(&n));
    }

    #[test]
    fn test_both_modes_keep_order() {
        for scheduler in [
            Scheduler::new(Scheduling::Sequential, None),
            Scheduler::new(Scheduling::Pool, Some(3)),
        ] {
            let out = scheduler.run((0..100).collect(), |x: u32| x * 2);
            assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
        }
        assert_eq!(Scheduler::new(Scheduling::Pool, Some(3)).threads(), 3);
    }
}
