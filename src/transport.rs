//! Transport interface boundary.
//!
//! The driver core does no protocol framing of its own. It talks to a serial
//! master through the [`ModbusMaster`] trait: issuing a request returns a
//! [`RequestHandle`] immediately, and the outcome (register values, echoed
//! write values, or a typed fault) arrives later through the handle. A
//! handle that never resolves is covered by the core's own per-request
//! timeout. Connectivity is exposed as a current state plus a watch
//! subscription so the scheduler can gate polling on it.

use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::register_map::RegisterSpace;

/// Connection state of the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The master can reach the bus.
    Connected,
    /// No connection; polling and writes are suspended.
    Disconnected,
}

impl LinkState {
    /// True when the link is usable.
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Terminal failure reported by the transport for one request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The slave answered with a protocol-level exception.
    #[error("protocol exception: {0}")]
    Protocol(String),
    /// The request failed at the link level.
    #[error("link error: {0}")]
    Link(String),
}

type ReplyResult = Result<Vec<u16>, TransportFault>;

/// Resolver half of a request; held by the transport implementation.
#[derive(Debug)]
pub struct RequestSlot {
    tx: oneshot::Sender<ReplyResult>,
}

impl RequestSlot {
    /// Resolve the request with register or coil values (echoed values for
    /// a write).
    pub fn resolve(self, values: Vec<u16>) {
        let _ = self.tx.send(Ok(values));
    }

    /// Fail the request with a typed fault.
    pub fn fail(self, fault: TransportFault) {
        let _ = self.tx.send(Err(fault));
    }
}

/// Consumer half of a request; eventually yields the outcome.
#[derive(Debug)]
pub struct RequestHandle {
    rx: oneshot::Receiver<ReplyResult>,
}

impl RequestHandle {
    /// Create a connected slot/handle pair.
    pub fn channel() -> (RequestSlot, RequestHandle) {
        let (tx, rx) = oneshot::channel();
        (RequestSlot { tx }, RequestHandle { rx })
    }

    /// Wait for the transport to resolve the request.
    ///
    /// A slot dropped without resolution counts as a link fault; a slot that
    /// is simply never touched keeps the future pending, which the request
    /// lifecycle bounds with its own timeout.
    pub async fn resolve(self) -> ReplyResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportFault::Link(
                "request abandoned by transport".to_string(),
            )),
        }
    }
}

/// Serial master abstraction consumed by the driver.
///
/// Implementations frame and exchange the actual protocol traffic. Both
/// send methods are non-blocking: they hand back a [`RequestHandle`] and
/// the exchange completes asynchronously.
pub trait ModbusMaster: Send + Sync {
    /// Current connection state.
    fn link_state(&self) -> LinkState;

    /// Subscribe to connection-state changes.
    fn subscribe_link(&self) -> watch::Receiver<LinkState>;

    /// Issue a block read of `count` addresses starting at `start`.
    fn send_read(
        &self,
        space: RegisterSpace,
        start: u16,
        count: u16,
        unit_id: u8,
    ) -> RequestHandle;

    /// Issue a write of `values` starting at `start`.
    fn send_write(
        &self,
        space: RegisterSpace,
        start: u16,
        values: Vec<u16>,
        unit_id: u8,
    ) -> RequestHandle;
}
