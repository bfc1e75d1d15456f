//! Partition worker runtime.
//!
//! The hosting application initializes parallelism explicitly by building
//! a `PartitionGroup` and running a job on it; nothing is spawned as a
//! module-load side effect. One worker thread runs per partition, each
//! owning its `ChannelComm`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use super::comm::ChannelComm;
use crate::config::ParallelSection;
use crate::error::FemError;

/// A fixed-size group of partition workers.
pub struct PartitionGroup {
    num_partitions: usize,
    timeout: Duration,
    abort: Arc<AtomicBool>,
}

/// Cooperative cancellation handle for a running group.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request cancellation; workers notice at the next iteration
    /// boundary or collective synchronization point.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl PartitionGroup {
    pub fn new(num_partitions: usize, timeout: Duration) -> Self {
        Self {
            num_partitions,
            timeout,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(cfg: &ParallelSection) -> Self {
        Self::new(cfg.num_partitions, Duration::from_millis(cfg.collective_timeout_ms))
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Handle that can cancel the group from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle { flag: Arc::clone(&self.abort) }
    }

    /// Run `job` on every partition and collect per-rank results.
    ///
    /// Each worker gets its own communicator; the job is the same on
    /// every rank (SPMD). Per-rank results are returned so callers can
    /// observe that collective failures surfaced on *all* ranks, not just
    /// the one that detected them.
    pub fn run<T, F>(&self, job: F) -> Vec<Result<T, FemError>>
    where
        T: Send,
        F: Fn(ChannelComm) -> Result<T, FemError> + Sync,
    {
        info!(
            "launching {} partition worker(s), collective timeout {:?}",
            self.num_partitions, self.timeout
        );
        let comms = ChannelComm::create(self.num_partitions, self.timeout, Arc::clone(&self.abort));
        let job = &job;
        let results = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .enumerate()
                .map(|(rank, comm)| {
                    scope.spawn(move || {
                        debug!("partition worker {} started", rank);
                        job(comm)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(Err(FemError::Aborted)))
                .collect::<Vec<_>>()
        });
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            info!("partition group finished with {} failed rank(s)", failures);
        }
        results
    }
}
