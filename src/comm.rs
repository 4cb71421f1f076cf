//! Message-passing abstraction over the process group.
//!
//! The solver only ever talks to peers through [`Communicator`]; the concrete
//! transport is injected by the caller. Two transports ship with the crate:
//! [`SingleRank`] for serial runs and [`ThreadComm`], a shared-memory group
//! of OS threads driven by [`ThreadWorld`], which the tests use to exercise
//! genuinely distributed code paths in one process.
//!
//! Collectives are built on the point-to-point pair and always combine
//! contributions in rank order, so reductions are bitwise deterministic for
//! a fixed rank count.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Point-to-point message passing within a fixed group of ranks.
///
/// Channels are FIFO per (sender, receiver) pair: messages from one peer
/// arrive in the order they were sent. `recv` blocks until a message from
/// the named peer is available.
pub trait Communicator: Clone + Send + Sized + 'static {
    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Sends one message to `to`. Sending to self is allowed.
    fn send<T: Send + 'static>(&self, to: usize, payload: Vec<T>);

    /// Receives the next message from `from`, blocking until it arrives.
    fn recv<T: Send + 'static>(&self, from: usize) -> Vec<T>;

    /// All-to-all exchange: `outgoing[r]` is delivered to rank `r`, and the
    /// result's slot `r` holds what rank `r` sent here. Every rank must call
    /// this with one payload per rank.
    fn exchange<T: Send + 'static>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>> {
        assert_eq!(outgoing.len(), self.size(), "one payload per rank");
        for (to, payload) in outgoing.into_iter().enumerate() {
            self.send(to, payload);
        }
        (0..self.size()).map(|from| self.recv(from)).collect()
    }

    /// Sum of one `f64` contribution per rank, identical on every rank.
    fn all_reduce_sum(&self, local: f64) -> f64 {
        let parts = self.exchange(vec![vec![local]; self.size()]);
        parts.iter().map(|p| p[0]).sum()
    }

    /// Gathers one `usize` per rank, indexed by rank, on every rank.
    fn all_gather(&self, local: usize) -> Vec<usize> {
        let parts = self.exchange(vec![vec![local]; self.size()]);
        parts.iter().map(|p| p[0]).collect()
    }
}

/// The one-rank group. Self-sends are buffered; any other peer is a bug.
#[derive(Clone, Default)]
pub struct SingleRank {
    mailbox: Arc<Mutex<VecDeque<Box<dyn Any + Send>>>>,
}

impl SingleRank {
    /// Creates the sole rank of a serial run.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send<T: Send + 'static>(&self, to: usize, payload: Vec<T>) {
        assert_eq!(to, 0, "single-rank group has no peer {to}");
        self.mailbox
            .lock()
            .expect("mailbox poisoned")
            .push_back(Box::new(payload));
    }

    fn recv<T: Send + 'static>(&self, from: usize) -> Vec<T> {
        assert_eq!(from, 0, "single-rank group has no peer {from}");
        let boxed = self
            .mailbox
            .lock()
            .expect("mailbox poisoned")
            .pop_front()
            .expect("recv on an empty single-rank mailbox");
        *boxed
            .downcast::<Vec<T>>()
            .expect("message type does not match recv type")
    }
}

struct Mailboxes {
    // One FIFO queue per (from, to) pair, indexed from * size + to.
    queues: Mutex<Vec<VecDeque<Box<dyn Any + Send>>>>,
    ready: Condvar,
}

/// One rank of an in-process thread group.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Mailboxes>,
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send<T: Send + 'static>(&self, to: usize, payload: Vec<T>) {
        assert!(to < self.size, "rank {to} outside group of {}", self.size);
        let mut queues = self.shared.queues.lock().expect("mailboxes poisoned");
        queues[self.rank * self.size + to].push_back(Box::new(payload));
        self.shared.ready.notify_all();
    }

    fn recv<T: Send + 'static>(&self, from: usize) -> Vec<T> {
        assert!(from < self.size, "rank {from} outside group of {}", self.size);
        let slot = from * self.size + self.rank;
        let mut queues = self.shared.queues.lock().expect("mailboxes poisoned");
        loop {
            if let Some(boxed) = queues[slot].pop_front() {
                return *boxed
                    .downcast::<Vec<T>>()
                    .expect("message type does not match recv type");
            }
            queues = self
                .shared
                .ready
                .wait(queues)
                .expect("mailboxes poisoned");
        }
    }
}

/// Runs one closure per rank on scoped threads and collects their results
/// in rank order.
pub struct ThreadWorld;

impl ThreadWorld {
    /// Spawns `size` ranks, hands each its [`ThreadComm`], and joins them.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Send + Sync,
    {
        assert!(size > 0, "a group needs at least one rank");
        let shared = Arc::new(Mailboxes {
            queues: Mutex::new((0..size * size).map(|_| VecDeque::new()).collect()),
            ready: Condvar::new(),
        });
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = ThreadComm {
                        rank,
                        size,
                        shared: Arc::clone(&shared),
                    };
                    scope.spawn(|| f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}
