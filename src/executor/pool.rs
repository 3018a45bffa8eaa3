// src/executor/pool.rs
//
// Bounded worker pool over scoped threads. Workers pull jobs from a shared
// channel and send results back as they finish, so the caller sees
// completion order, not submission order. A panicking job is reported as an
// error for its own label and never takes other jobs down.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;

pub const MAX_WORKERS: usize = 32;

#[derive(Debug)]
pub struct Completed<R> {
    pub label: String,
    /// Err holds the panic message of a job that panicked.
    pub result: Result<R, String>,
}

/// `min(32, cpus + 4)`
pub fn default_workers() -> usize {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cpus + 4).min(MAX_WORKERS)
}

pub fn run_bounded<T, R, F>(jobs: Vec<(String, T)>, workers: usize, work: F) -> Vec<Completed<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if jobs.is_empty() {
        return Vec::new();
    }

    let workers = workers.clamp(1, jobs.len());
    let total = jobs.len();

    let (job_tx, job_rx) = unbounded::<(String, T)>();
    let (done_tx, done_rx) = unbounded::<Completed<R>>();

    for job in jobs {
        // Receiver is alive until the scope below ends.
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let work = &work;
    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();

            scope.spawn(move || {
                for (label, input) in job_rx.iter() {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| work(input)))
                        .map_err(panic_message);
                    if done_tx.send(Completed { label, result }).is_err() {
                        return;
                    }
                }
            });
        }
        drop(done_tx);

        done_rx.iter().take(total).collect()
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn every_job_completes_once() {
        let jobs: Vec<(String, u64)> = (0..20).map(|i| (format!("job{i}"), i)).collect();
        let done = run_bounded(jobs, 4, |i| i * 2);

        assert_eq!(done.len(), 20);
        let labels: HashSet<_> = done.iter().map(|c| c.label.clone()).collect();
        assert_eq!(labels.len(), 20);
        let sum: u64 = done.iter().map(|c| *c.result.as_ref().unwrap()).sum();
        assert_eq!(sum, (0..20).map(|i| i * 2).sum::<u64>());
    }

    #[test]
    fn results_arrive_in_completion_order() {
        let jobs = vec![("slow".to_string(), 200u64), ("fast".to_string(), 0u64)];
        let done = run_bounded(jobs, 2, |ms| thread::sleep(Duration::from_millis(ms)));

        assert_eq!(done[0].label, "fast");
        assert_eq!(done[1].label, "slow");
    }

    #[test]
    fn concurrency_never_exceeds_the_bound() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let jobs: Vec<(String, ())> = (0..12).map(|i| (i.to_string(), ())).collect();

        run_bounded(jobs, 3, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn a_panicking_job_is_contained() {
        let jobs = vec![("ok".to_string(), false), ("boom".to_string(), true)];
        let done = run_bounded(jobs, 2, |explode| {
            if explode {
                panic!("worker exploded");
            }
            1
        });

        let boom = done.iter().find(|c| c.label == "boom").unwrap();
        assert_eq!(boom.result.as_ref().unwrap_err(), "worker exploded");
        let ok = done.iter().find(|c| c.label == "ok").unwrap();
        assert_eq!(ok.result, Ok(1));
    }

    #[test]
    fn default_worker_count_is_bounded() {
        let n = default_workers();
        assert!((5..=MAX_WORKERS).contains(&n));
    }
}
