//! Request correlation and completion tracking.
//!
//! Every dispatched request gets a correlation id and an entry in the
//! pending table describing the logical operation behind it. A spawned
//! watcher awaits the transport handle under a timeout and reports exactly
//! one [`Completion`] back to the worker, which resolves the table entry.
//! Timeout and resolution are mutually exclusive by construction, and a
//! completion for an id no longer in the table is a no-op, so a late
//! transport resolution can never be applied twice.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::coalesce::ReadBlock;
use crate::register_map::RegisterSpace;
use crate::transport::{RequestHandle, TransportFault};

/// Opaque identifier linking a dispatched request to its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new(raw: u64) -> Self {
        RequestId(raw)
    }

    /// Raw id value, for logging and external correlation.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The logical operation behind one in-flight request.
#[derive(Debug, Clone)]
pub enum PendingOp {
    /// A coalesced block read issued by polling or an on-demand read.
    BlockRead {
        /// Register table the block was read from.
        space: RegisterSpace,
        /// The contiguous range that was requested.
        block: ReadBlock,
    },
    /// A single queued write.
    Write {
        /// Register table written to.
        space: RegisterSpace,
        /// First written address.
        address: u16,
        /// The register values that were sent.
        values: Vec<u16>,
    },
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transport resolved with data (or a write echo).
    Success(Vec<u16>),
    /// The slave reported a protocol exception.
    Protocol(String),
    /// The request failed at the link level.
    Transport(String),
    /// No resolution arrived within the timeout bound.
    TimedOut,
}

/// Completion notification delivered to the worker.
#[derive(Debug)]
pub struct Completion {
    /// Correlation id of the finished request.
    pub id: RequestId,
    /// How it ended.
    pub outcome: Outcome,
}

/// Pending-request table: correlation id to logical operation.
#[derive(Debug, Default)]
pub struct Correlations {
    pending: HashMap<RequestId, PendingOp>,
}

impl Correlations {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatched request.
    pub fn insert(&mut self, id: RequestId, op: PendingOp) {
        self.pending.insert(id, op);
    }

    /// Take the operation for a completed request.
    ///
    /// Returns `None` when the id is unknown, which makes a second
    /// resolution of the same request a no-op.
    pub fn resolve(&mut self, id: RequestId) -> Option<PendingOp> {
        self.pending.remove(&id)
    }

    /// Number of requests still awaiting completion.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Watch a dispatched request until it resolves or times out.
///
/// Spawns a task that sends exactly one [`Completion`] for `id`: either the
/// transport's resolution or, after `timeout` elapses, [`Outcome::TimedOut`].
/// At timeout the handle is dropped, so a late transport resolution has
/// nowhere to land. Each watcher is independent; a timeout never affects
/// other outstanding requests.
pub fn track(
    id: RequestId,
    handle: RequestHandle,
    timeout: Duration,
    completions: mpsc::Sender<Completion>,
) {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(timeout, handle.resolve()).await {
            Ok(Ok(values)) => Outcome::Success(values),
            Ok(Err(TransportFault::Protocol(message))) => Outcome::Protocol(message),
            Ok(Err(TransportFault::Link(message))) => Outcome::Transport(message),
            Err(_) => {
                trace!("request {id} timed out after {timeout:?}");
                Outcome::TimedOut
            }
        };
        let _ = completions.send(Completion { id, outcome }).await;
    });
}
