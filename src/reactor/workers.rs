//! Cached worker pool for blocking DNS resolution and `connect()`.
//!
//! The pool is process-wide and unbounded: a job either wakes an idle
//! worker or starts a fresh thread. Idle workers park for five seconds
//! and exit when no work arrives, so bursts are cheap and a quiet process
//! carries no threads. Workers never touch reactor or script state; they
//! hand a result to the submitting reactor's FIFO and wake its poller.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce() + Send>;

struct PoolState {
    queue: VecDeque<Job>,
    idle: usize,
}

struct Pool {
    state: Mutex<PoolState>,
    available: Condvar,
}

fn pool() -> &'static Pool {
    static POOL: OnceLock<Pool> = OnceLock::new();
    POOL.get_or_init(|| Pool {
        state: Mutex::new(PoolState {
            queue: VecDeque::new(),
            idle: 0,
        }),
        available: Condvar::new(),
    })
}

/// Runs `job` on a pool worker.
pub(super) fn spawn_blocking(job: Job) {
    let p = pool();
    let spawn_worker = {
        let mut state = p.state.lock();
        state.queue.push_back(job);
        if state.idle > 0 {
            p.available.notify_one();
            false
        } else {
            true
        }
    };
    if spawn_worker {
        if let Err(err) = std::thread::Builder::new()
            .name("bedrock-worker".into())
            .spawn(worker)
        {
            tracing::error!(%err, "can't start pool worker");
        }
    }
}

fn worker() {
    let p = pool();
    loop {
        let job = {
            let mut state = p.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                state.idle += 1;
                let timed_out = p
                    .available
                    .wait_for(&mut state, IDLE_TIMEOUT)
                    .timed_out();
                state.idle -= 1;
                if timed_out && state.queue.is_empty() {
                    return;
                }
            }
        };
        job();
    }
}
