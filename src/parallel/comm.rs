//! Inter-partition communication.
//!
//! Partitions cooperate through explicit message exchange, never shared
//! memory: one worker per partition, a full mesh of mpsc channels, and a
//! small set of collective operations (reduce, gather, halo exchange,
//! barrier). Every collective is bounded by a timeout; a rank that times
//! out broadcasts a failure message to every peer so that no rank is left
//! blocked on a dead collective, and all ranks surface
//! `FemError::CollectiveTimeout`.
//!
//! A failed group is poisoned: ranks are no longer in program-order sync
//! and messages left over from the abandoned collective must not be
//! mistaken for a later one's, so every subsequent collective on the same
//! group fails fast. Retrying means running the job on a fresh
//! `PartitionGroup`.
//!
//! Cancellation is cooperative: an abort flag is checked on entry to
//! every collective.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::FemError;

/// Boundary data exchanged with one neighbor during assembly.
#[derive(Debug, Clone)]
pub struct HaloPayload {
    /// Sorted dofs the sender believes it shares with the receiver;
    /// receivers verify this against their own partition map
    pub shared_dofs: Vec<usize>,
    /// Matrix triplets whose row is a shared dof
    pub matrix_triplets: Vec<(usize, usize, f64)>,
    /// Rhs contributions at shared dofs
    pub rhs_entries: Vec<(usize, f64)>,
}

#[derive(Debug, Clone)]
enum Msg {
    Halo(HaloPayload),
    Reduce(f64),
    ReduceResult(f64),
    ReduceVec(Vec<f64>),
    ReduceVecResult(Vec<f64>),
    Gather(Vec<(usize, f64)>),
    Failure,
}

/// Collective operations between partitions.
///
/// The same engine code drives serial and partitioned runs through this
/// seam; `SerialComm` short-circuits everything for a single partition.
pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Sum a scalar across all partitions; every rank gets the total.
    fn allreduce_sum(&self, value: f64) -> Result<f64, FemError>;

    /// Elementwise sum a vector across all partitions, in place.
    fn allreduce_sum_vec(&self, values: &mut [f64]) -> Result<(), FemError>;

    /// Distribute owned (index, value) entries to every rank; each rank
    /// writes all received entries (and its own) into `out`.
    fn allgather_entries(&self, entries: &[(usize, f64)], out: &mut [f64])
        -> Result<(), FemError>;

    /// Symmetric neighbor exchange of boundary payloads. `sends` holds one
    /// payload per neighbor; the result holds the payload received from
    /// each of those same neighbors.
    fn exchange_halo(
        &self,
        sends: Vec<(usize, HaloPayload)>,
    ) -> Result<Vec<(usize, HaloPayload)>, FemError>;

    fn barrier(&self) -> Result<(), FemError>;

    /// Cooperative cancellation check, called at collective entry and at
    /// solver iteration boundaries.
    fn check_abort(&self) -> Result<(), FemError>;
}

/// Trivial communicator for a single partition.
pub struct SerialComm {
    abort: Option<Arc<AtomicBool>>,
}

impl SerialComm {
    pub fn new() -> Self {
        Self { abort: None }
    }

    pub fn with_abort(abort: Arc<AtomicBool>) -> Self {
        Self { abort: Some(abort) }
    }
}

impl Default for SerialComm {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, value: f64) -> Result<f64, FemError> {
        self.check_abort()?;
        Ok(value)
    }

    fn allreduce_sum_vec(&self, _values: &mut [f64]) -> Result<(), FemError> {
        self.check_abort()
    }

    fn allgather_entries(
        &self,
        entries: &[(usize, f64)],
        out: &mut [f64],
    ) -> Result<(), FemError> {
        self.check_abort()?;
        for &(idx, val) in entries {
            out[idx] = val;
        }
        Ok(())
    }

    fn exchange_halo(
        &self,
        sends: Vec<(usize, HaloPayload)>,
    ) -> Result<Vec<(usize, HaloPayload)>, FemError> {
        self.check_abort()?;
        debug_assert!(sends.is_empty(), "serial communicator has no neighbors");
        Ok(Vec::new())
    }

    fn barrier(&self) -> Result<(), FemError> {
        self.check_abort()
    }

    fn check_abort(&self) -> Result<(), FemError> {
        match &self.abort {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(FemError::Aborted),
            _ => Ok(()),
        }
    }
}

enum RecvFailure {
    Timeout,
    PeerFailed,
}

/// Per-source message queues over a single mpsc receiver.
///
/// Collectives are executed in the same program order on every rank, so
/// messages from one sender arrive in order; the queues only untangle
/// interleaving between different senders. Once a failure has been seen
/// the inbox stays failed: the ordering assumption no longer holds, and
/// the group has to be rebuilt before another collective can run.
struct Inbox {
    rx: Receiver<(usize, Msg)>,
    queues: Vec<VecDeque<Msg>>,
    peer_failed: bool,
}

impl Inbox {
    fn new(rx: Receiver<(usize, Msg)>, size: usize) -> Self {
        Self { rx, queues: vec![VecDeque::new(); size], peer_failed: false }
    }

    fn recv_from(&mut self, src: usize, timeout: Duration) -> Result<Msg, RecvFailure> {
        if self.peer_failed {
            return Err(RecvFailure::PeerFailed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.queues[src].pop_front() {
                if matches!(msg, Msg::Failure) {
                    self.peer_failed = true;
                    return Err(RecvFailure::PeerFailed);
                }
                return Ok(msg);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RecvFailure::Timeout);
            }
            match self.rx.recv_timeout(remaining) {
                Ok((_, Msg::Failure)) => {
                    self.peer_failed = true;
                    return Err(RecvFailure::PeerFailed);
                }
                Ok((from, msg)) => self.queues[from].push_back(msg),
                // Disconnected senders surface as a timeout as well
                Err(_) => return Err(RecvFailure::Timeout),
            }
        }
    }
}

/// Channel-backed communicator: one instance per partition worker.
pub struct ChannelComm {
    rank: usize,
    size: usize,
    senders: Vec<Sender<(usize, Msg)>>,
    inbox: RefCell<Inbox>,
    timeout: Duration,
    abort: Arc<AtomicBool>,
}

impl ChannelComm {
    /// Build the full channel mesh for `size` partitions.
    ///
    /// Returns one communicator per rank; each must be moved into its
    /// worker thread. All share the same abort flag.
    pub fn create(size: usize, timeout: Duration, abort: Arc<AtomicBool>) -> Vec<ChannelComm> {
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = channel();
            senders.push(tx);
            receivers.push(rx);
        }

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| ChannelComm {
                rank,
                size,
                senders: senders.clone(),
                inbox: RefCell::new(Inbox::new(rx, size)),
                timeout,
                abort: Arc::clone(&abort),
            })
            .collect()
    }

    fn send_to(&self, dest: usize, msg: Msg) {
        // A disconnected peer shows up later as a timeout; nothing to do
        // about the send itself.
        let _ = self.senders[dest].send((self.rank, msg));
    }

    /// Tell every peer this rank has abandoned the current collective.
    fn broadcast_failure(&self) {
        for dest in 0..self.size {
            if dest != self.rank {
                self.send_to(dest, Msg::Failure);
            }
        }
    }

    fn timeout_error(&self) -> FemError {
        FemError::CollectiveTimeout { rank: self.rank, timeout_ms: self.timeout.as_millis() as u64 }
    }

    /// Receive the next message from `src`, converting timeouts into
    /// `CollectiveTimeout` and broadcasting failure so peers do not hang.
    fn recv_from(&self, src: usize) -> Result<Msg, FemError> {
        let result = self.inbox.borrow_mut().recv_from(src, self.timeout);
        match result {
            Ok(msg) => Ok(msg),
            Err(RecvFailure::Timeout) => {
                // Poison our own inbox as well so the whole group rejects
                // further collectives, not just the peers we notified.
                self.inbox.borrow_mut().peer_failed = true;
                self.broadcast_failure();
                Err(self.timeout_error())
            }
            // The failing peer already notified everyone
            Err(RecvFailure::PeerFailed) => Err(self.timeout_error()),
        }
    }

    fn protocol_error(&self, src: usize) -> FemError {
        FemError::PartitionMismatch { rank: self.rank, neighbor: src }
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn allreduce_sum(&self, value: f64) -> Result<f64, FemError> {
        self.check_abort()?;
        if self.size == 1 {
            return Ok(value);
        }
        if self.rank == 0 {
            let mut total = value;
            for src in 1..self.size {
                match self.recv_from(src)? {
                    Msg::Reduce(v) => total += v,
                    _ => return Err(self.protocol_error(src)),
                }
            }
            for dest in 1..self.size {
                self.send_to(dest, Msg::ReduceResult(total));
            }
            Ok(total)
        } else {
            self.send_to(0, Msg::Reduce(value));
            match self.recv_from(0)? {
                Msg::ReduceResult(total) => Ok(total),
                _ => Err(self.protocol_error(0)),
            }
        }
    }

    fn allreduce_sum_vec(&self, values: &mut [f64]) -> Result<(), FemError> {
        self.check_abort()?;
        if self.size == 1 {
            return Ok(());
        }
        if self.rank == 0 {
            for src in 1..self.size {
                match self.recv_from(src)? {
                    Msg::ReduceVec(v) if v.len() == values.len() => {
                        for (acc, x) in values.iter_mut().zip(v.iter()) {
                            *acc += x;
                        }
                    }
                    _ => return Err(self.protocol_error(src)),
                }
            }
            for dest in 1..self.size {
                self.send_to(dest, Msg::ReduceVecResult(values.to_vec()));
            }
            Ok(())
        } else {
            self.send_to(0, Msg::ReduceVec(values.to_vec()));
            match self.recv_from(0)? {
                Msg::ReduceVecResult(total) if total.len() == values.len() => {
                    values.copy_from_slice(&total);
                    Ok(())
                }
                _ => Err(self.protocol_error(0)),
            }
        }
    }

    fn allgather_entries(
        &self,
        entries: &[(usize, f64)],
        out: &mut [f64],
    ) -> Result<(), FemError> {
        self.check_abort()?;
        for &(idx, val) in entries {
            out[idx] = val;
        }
        if self.size == 1 {
            return Ok(());
        }
        for dest in 0..self.size {
            if dest != self.rank {
                self.send_to(dest, Msg::Gather(entries.to_vec()));
            }
        }
        for src in 0..self.size {
            if src == self.rank {
                continue;
            }
            match self.recv_from(src)? {
                Msg::Gather(received) => {
                    for (idx, val) in received {
                        out[idx] = val;
                    }
                }
                _ => return Err(self.protocol_error(src)),
            }
        }
        Ok(())
    }

    fn exchange_halo(
        &self,
        sends: Vec<(usize, HaloPayload)>,
    ) -> Result<Vec<(usize, HaloPayload)>, FemError> {
        self.check_abort()?;
        for (dest, payload) in &sends {
            self.send_to(*dest, Msg::Halo(payload.clone()));
        }
        let mut received = Vec::with_capacity(sends.len());
        for (src, _) in &sends {
            match self.recv_from(*src)? {
                Msg::Halo(payload) => received.push((*src, payload)),
                _ => return Err(self.protocol_error(*src)),
            }
        }
        Ok(received)
    }

    fn barrier(&self) -> Result<(), FemError> {
        self.allreduce_sum(0.0).map(|_| ())
    }

    fn check_abort(&self) -> Result<(), FemError> {
        if self.abort.load(Ordering::Relaxed) {
            Err(FemError::Aborted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_on_ranks<T, F>(size: usize, timeout_ms: u64, f: F) -> Vec<Result<T, FemError>>
    where
        T: Send,
        F: Fn(&ChannelComm) -> Result<T, FemError> + Sync,
    {
        let abort = Arc::new(AtomicBool::new(false));
        let comms = ChannelComm::create(size, Duration::from_millis(timeout_ms), abort);
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(&comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_allreduce_sum_across_ranks() {
        let results = run_on_ranks(3, 2000, |comm| comm.allreduce_sum(comm.rank() as f64 + 1.0));
        for result in results {
            assert_eq!(result.unwrap(), 6.0);
        }
    }

    #[test]
    fn test_allreduce_vec_across_ranks() {
        let results = run_on_ranks(2, 2000, |comm| {
            let mut v = vec![comm.rank() as f64, 1.0];
            comm.allreduce_sum_vec(&mut v)?;
            Ok(v)
        });
        for result in results {
            assert_eq!(result.unwrap(), vec![1.0, 2.0]);
        }
    }

    #[test]
    fn test_allgather_entries() {
        let results = run_on_ranks(2, 2000, |comm| {
            let entries = vec![(comm.rank(), 10.0 * (comm.rank() as f64 + 1.0))];
            let mut out = vec![0.0; 2];
            comm.allgather_entries(&entries, &mut out)?;
            Ok(out)
        });
        for result in results {
            assert_eq!(result.unwrap(), vec![10.0, 20.0]);
        }
    }

    #[test]
    fn test_silent_rank_times_out_everywhere() {
        // Rank 2 never joins the collective; ranks 0 and 1 must both get
        // a timeout instead of hanging.
        let results = run_on_ranks(3, 100, |comm| {
            if comm.rank() == 2 {
                thread::sleep(Duration::from_millis(400));
                return Ok(0.0);
            }
            comm.allreduce_sum(1.0)
        });
        assert!(matches!(results[0], Err(FemError::CollectiveTimeout { .. })));
        assert!(matches!(results[1], Err(FemError::CollectiveTimeout { .. })));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_timed_out_group_rejects_further_collectives() {
        // After one timeout the group is poisoned: the retry must fail
        // fast on every surviving rank instead of waiting out another
        // timeout on a group that can no longer get back in sync.
        let results = run_on_ranks(3, 100, |comm| {
            if comm.rank() == 2 {
                thread::sleep(Duration::from_millis(400));
                return Ok(0.0);
            }
            let first = comm.allreduce_sum(1.0);
            assert!(matches!(first, Err(FemError::CollectiveTimeout { .. })));
            let started = Instant::now();
            let second = comm.allreduce_sum(1.0);
            assert!(started.elapsed() < Duration::from_millis(80));
            second
        });
        assert!(matches!(results[0], Err(FemError::CollectiveTimeout { .. })));
        assert!(matches!(results[1], Err(FemError::CollectiveTimeout { .. })));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_abort_flag_stops_collectives() {
        let abort = Arc::new(AtomicBool::new(true));
        let mut comms = ChannelComm::create(2, Duration::from_millis(100), abort);
        let comm = comms.remove(0);
        assert!(matches!(comm.allreduce_sum(1.0), Err(FemError::Aborted)));
    }

    #[test]
    fn test_halo_roundtrip_between_neighbors() {
        let results = run_on_ranks(2, 2000, |comm| {
            let other = 1 - comm.rank();
            let payload = HaloPayload {
                shared_dofs: vec![5],
                matrix_triplets: vec![(5, 5, comm.rank() as f64 + 1.0)],
                rhs_entries: vec![(5, 0.5)],
            };
            let received = comm.exchange_halo(vec![(other, payload)])?;
            Ok(received)
        });
        for (rank, result) in results.into_iter().enumerate() {
            let received = result.unwrap();
            assert_eq!(received.len(), 1);
            let (src, payload) = &received[0];
            assert_eq!(*src, 1 - rank);
            assert_eq!(payload.matrix_triplets[0].2, (1 - rank) as f64 + 1.0);
        }
    }
}
