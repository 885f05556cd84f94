//! Extension-module driver: facade and scheduler worker.
//!
//! All register access for one extension module runs on a single logical
//! worker task driven by four stimuli: the fast input-poll timer, the slow
//! output-poll timer, caller commands, and asynchronous request
//! completions. The worker exclusively owns the change caches, the write
//! queue and the correlation table; the register map is shared read-only
//! with the [`ExtensionDriver`] handle.
//!
//! Writes execute one at a time in arrival order and suspend polling until
//! the queue drains. Reads are coalesced into contiguous blocks and issued
//! independently per block. Every request carries its own timeout, and all
//! outcomes (including per-request failures) surface as [`DriverEvent`]s or
//! log entries; none of them stop the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::change_cache::ChangeCache;
use crate::coalesce::{coalesce, ReadBlock};
use crate::error::{DriverError, DriverResult};
use crate::lifecycle::{track, Completion, Correlations, Outcome, PendingOp, RequestId};
use crate::queue::{PendingWrite, Submission, WriteQueue};
use crate::register_map::{RegisterKind, RegisterMap, RegisterSpace};
use crate::scheduler::{PollGate, PollState};
use crate::transport::{LinkState, ModbusMaster};

/// Default fast poll interval for input reads (milliseconds).
pub const DEFAULT_INPUT_POLL_MS: u64 = 200;

/// Default slow poll interval for output readback (milliseconds).
pub const DEFAULT_OUTPUT_POLL_MS: u64 = 1000;

/// Default timeout for read requests (milliseconds).
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 200;

/// Default timeout for write requests (milliseconds).
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

/// Scheduler configuration.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use fieldio_modbus::DriverConfig;
///
/// let config = DriverConfig::default()
///     .with_unit_id(2)
///     .with_write_timeout(Duration::from_millis(500));
/// assert_eq!(config.unit_id, 2);
/// ```
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Slave/unit identifier of the extension module.
    pub unit_id: u8,
    /// Fast poll interval driving digital- and analog-input reads.
    pub input_poll_interval: Duration,
    /// Slow poll interval driving output readback.
    pub output_poll_interval: Duration,
    /// Timeout applied to every read request.
    pub read_timeout: Duration,
    /// Timeout applied to every write request.
    pub write_timeout: Duration,
    /// Capacity of the pending-write FIFO.
    pub write_queue_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            unit_id: 1,
            input_poll_interval: Duration::from_millis(DEFAULT_INPUT_POLL_MS),
            output_poll_interval: Duration::from_millis(DEFAULT_OUTPUT_POLL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            write_queue_capacity: crate::queue::DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }
}

impl DriverConfig {
    /// Set the slave/unit identifier.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Set the fast input-poll interval.
    pub fn with_input_poll_interval(mut self, interval: Duration) -> Self {
        self.input_poll_interval = interval;
        self
    }

    /// Set the slow output-poll interval.
    pub fn with_output_poll_interval(mut self, interval: Duration) -> Self {
        self.output_poll_interval = interval;
        self
    }

    /// Set the read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the pending-write FIFO capacity.
    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    fn validate(&self) -> DriverResult<()> {
        if self.input_poll_interval.is_zero()
            || self.output_poll_interval.is_zero()
            || self.read_timeout.is_zero()
            || self.write_timeout.is_zero()
        {
            return Err(DriverError::config_load(
                "poll intervals and timeouts must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Edge-triggered notifications emitted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A digital input changed state.
    DigitalInputChanged {
        /// Circuit name.
        circuit: String,
        /// New state.
        value: bool,
    },
    /// A digital or relay output changed state.
    DigitalOutputChanged {
        /// Circuit name.
        circuit: String,
        /// New state.
        value: bool,
    },
    /// A user-programmable indicator changed state.
    IndicatorChanged {
        /// Circuit name.
        circuit: String,
        /// New state.
        value: bool,
    },
    /// An analog input changed value.
    AnalogInputChanged {
        /// Circuit name.
        circuit: String,
        /// New raw 32-bit value (big-endian register pair).
        value: u32,
    },
    /// An analog output changed value.
    AnalogOutputChanged {
        /// Circuit name.
        circuit: String,
        /// New raw 32-bit value (big-endian register pair).
        value: u32,
    },
    /// A write finished, successfully or not.
    WriteCompleted {
        /// Correlation id returned when the write was accepted.
        id: RequestId,
        /// Whether the device confirmed the write.
        success: bool,
        /// Failure detail; `None` on success.
        detail: Option<String>,
    },
    /// The link connectivity changed.
    LinkChanged {
        /// New connectivity.
        connected: bool,
    },
}

enum Command {
    Write {
        kind: RegisterKind,
        circuit: String,
        raw: u32,
        reply: oneshot::Sender<DriverResult<RequestId>>,
    },
    ReadCircuit {
        kind: RegisterKind,
        circuit: String,
        reply: oneshot::Sender<DriverResult<()>>,
    },
    ReadAll {
        kind: RegisterKind,
        reply: oneshot::Sender<DriverResult<()>>,
    },
}

/// Handle to a running extension-module driver.
///
/// Cloneable; all clones talk to the same worker. Dropping every clone
/// shuts the worker down.
#[derive(Clone)]
pub struct ExtensionDriver {
    map: Arc<RegisterMap>,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<DriverEvent>,
    unit_id: u8,
}

impl ExtensionDriver {
    /// Validate the configuration and spawn the scheduler worker.
    pub fn start(
        map: RegisterMap,
        transport: Arc<dyn ModbusMaster>,
        config: DriverConfig,
    ) -> DriverResult<Self> {
        config.validate()?;

        let map = Arc::new(map);
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(256);
        let (completion_tx, completion_rx) = mpsc::channel(64);
        let link_rx = transport.subscribe_link();
        let unit_id = config.unit_id;
        let queue = WriteQueue::new(config.write_queue_capacity);

        let worker = Worker {
            map: Arc::clone(&map),
            transport,
            config,
            events: event_tx.clone(),
            commands: command_rx,
            completion_tx,
            completion_rx,
            link_rx,
            link_watch_alive: true,
            gate: PollGate::new(),
            queue,
            correlations: Correlations::new(),
            coil_cache: ChangeCache::new(),
            input_cache: ChangeCache::new(),
            holding_cache: ChangeCache::new(),
            deferred_reads: Vec::new(),
            next_id: 0,
        };
        tokio::spawn(worker.run());

        Ok(ExtensionDriver {
            map,
            commands: command_tx,
            events: event_tx,
            unit_id,
        })
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    /// Slave/unit identifier this driver talks to.
    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// The loaded register map.
    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Circuit names of one kind, sorted.
    pub fn circuits(&self, kind: RegisterKind) -> Vec<String> {
        self.map.circuits(kind)
    }

    /// Set a digital or relay output.
    pub async fn write_digital(&self, circuit: &str, value: bool) -> DriverResult<RequestId> {
        self.submit_write(RegisterKind::DigitalOutput, circuit, u32::from(value))
            .await
    }

    /// Set a user-programmable indicator.
    pub async fn write_indicator(&self, circuit: &str, value: bool) -> DriverResult<RequestId> {
        self.submit_write(RegisterKind::Indicator, circuit, u32::from(value))
            .await
    }

    /// Set an analog output to a raw 32-bit value.
    pub async fn write_analog(&self, circuit: &str, value: u32) -> DriverResult<RequestId> {
        self.submit_write(RegisterKind::AnalogOutput, circuit, value)
            .await
    }

    /// Trigger an immediate out-of-band read of one circuit.
    ///
    /// Independent of the poll timers; the result arrives as a change event
    /// if the value differs from the cached one.
    pub async fn read_circuit(&self, kind: RegisterKind, circuit: &str) -> DriverResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::ReadCircuit {
                kind,
                circuit: circuit.to_string(),
                reply,
            })
            .await
            .map_err(|_| DriverError::Closed)?;
        response.await.map_err(|_| DriverError::Closed)?
    }

    /// Trigger an immediate out-of-band read of all circuits of one kind.
    pub async fn read_all(&self, kind: RegisterKind) -> DriverResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::ReadAll { kind, reply })
            .await
            .map_err(|_| DriverError::Closed)?;
        response.await.map_err(|_| DriverError::Closed)?
    }

    async fn submit_write(
        &self,
        kind: RegisterKind,
        circuit: &str,
        raw: u32,
    ) -> DriverResult<RequestId> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Write {
                kind,
                circuit: circuit.to_string(),
                raw,
                reply,
            })
            .await
            .map_err(|_| DriverError::Closed)?;
        response.await.map_err(|_| DriverError::Closed)?
    }
}

struct Worker {
    map: Arc<RegisterMap>,
    transport: Arc<dyn ModbusMaster>,
    config: DriverConfig,
    events: broadcast::Sender<DriverEvent>,
    commands: mpsc::Receiver<Command>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    link_rx: watch::Receiver<LinkState>,
    link_watch_alive: bool,
    gate: PollGate,
    queue: WriteQueue,
    correlations: Correlations,
    coil_cache: ChangeCache,
    input_cache: ChangeCache,
    holding_cache: ChangeCache,
    deferred_reads: Vec<(RegisterSpace, ReadBlock)>,
    next_id: u64,
}

impl Worker {
    async fn run(mut self) {
        let mut input_timer = tokio::time::interval(self.config.input_poll_interval);
        input_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut output_timer = tokio::time::interval(self.config.output_poll_interval);
        output_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self
            .gate
            .set_connected(self.transport.link_state().is_connected())
            == Some(PollState::Running)
        {
            debug!("link connected, polling started");
        }

        loop {
            tokio::select! {
                _ = input_timer.tick(), if self.gate.is_running() => self.poll_inputs(),
                _ = output_timer.tick(), if self.gate.is_running() => self.poll_outputs(),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone; stop the scheduler.
                    None => break,
                },
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
                changed = self.link_rx.changed(), if self.link_watch_alive => {
                    match changed {
                        Ok(()) => {
                            let connected = self.link_rx.borrow_and_update().is_connected();
                            self.handle_link_change(connected);
                        }
                        Err(_) => {
                            warn!("transport dropped its link watch, treating link as down");
                            self.link_watch_alive = false;
                            self.handle_link_change(false);
                        }
                    }
                }
            }
        }
        debug!("driver worker for unit {} stopped", self.config.unit_id);
    }

    fn mint_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId::new(self.next_id)
    }

    fn emit(&self, event: DriverEvent) {
        // No subscribers is fine; events are edge notifications, not state.
        let _ = self.events.send(event);
    }

    // ===== Polling =====

    fn poll_inputs(&mut self) {
        trace!("input poll tick");
        self.issue_kind_read(RegisterKind::DigitalInput);
        self.issue_kind_read(RegisterKind::AnalogInput);
    }

    fn poll_outputs(&mut self) {
        trace!("output poll tick");
        self.issue_kind_read(RegisterKind::DigitalOutput);
        self.issue_kind_read(RegisterKind::AnalogOutput);
    }

    fn issue_kind_read(&mut self, kind: RegisterKind) {
        let addresses = self.read_addresses(kind);
        for block in coalesce(&addresses) {
            self.request_read(kind.space(), block);
        }
    }

    /// The full address set a bulk read of `kind` has to cover. Analog
    /// circuits occupy two consecutive registers each.
    fn read_addresses(&self, kind: RegisterKind) -> Vec<u16> {
        let bases = self.map.addresses(kind);
        match kind.space() {
            RegisterSpace::Coil => bases,
            RegisterSpace::InputRegister | RegisterSpace::HoldingRegister => bases
                .into_iter()
                .flat_map(|base| {
                    base.checked_add(1)
                        .map_or(vec![base], |low| vec![base, low])
                })
                .collect(),
        }
    }

    fn request_read(&mut self, space: RegisterSpace, block: ReadBlock) {
        if self.queue.has_pending() {
            // Half-duplex discipline: nothing else goes on the wire while a
            // write is pending. On-demand reads wait for the queue to drain.
            trace!(
                "write pending, deferring read of {:?} block {}+{}",
                space,
                block.start,
                block.count
            );
            self.deferred_reads.push((space, block));
            return;
        }
        self.dispatch_read(space, block);
    }

    fn dispatch_read(&mut self, space: RegisterSpace, block: ReadBlock) {
        let id = self.mint_id();
        let handle = self
            .transport
            .send_read(space, block.start, block.count, self.config.unit_id);
        self.correlations.insert(id, PendingOp::BlockRead { space, block });
        track(id, handle, self.config.read_timeout, self.completion_tx.clone());
        trace!(
            "read {id}: {:?} block {}+{} dispatched",
            space,
            block.start,
            block.count
        );
    }

    fn flush_deferred_reads(&mut self) {
        if self.deferred_reads.is_empty() {
            return;
        }
        let reads = std::mem::take(&mut self.deferred_reads);
        if !self.gate.connected() {
            warn!("link is down, dropping {} deferred reads", reads.len());
            return;
        }
        for (space, block) in reads {
            self.dispatch_read(space, block);
        }
    }

    // ===== Commands =====

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Write {
                kind,
                circuit,
                raw,
                reply,
            } => {
                let result = self.submit_write(kind, &circuit, raw);
                let _ = reply.send(result);
            }
            Command::ReadCircuit {
                kind,
                circuit,
                reply,
            } => {
                let result = self.read_circuit_now(kind, &circuit);
                let _ = reply.send(result);
            }
            Command::ReadAll { kind, reply } => {
                let _ = reply.send(self.read_all_now(kind));
            }
        }
    }

    fn submit_write(&mut self, kind: RegisterKind, circuit: &str, raw: u32) -> DriverResult<RequestId> {
        let address = self
            .map
            .address(kind, circuit)
            .ok_or_else(|| DriverError::UnknownCircuit {
                name: circuit.to_string(),
            })?;

        let space = kind.space();
        let values = match space {
            RegisterSpace::Coil => vec![u16::from(raw != 0)],
            // Big-endian register pair: high half first.
            RegisterSpace::InputRegister | RegisterSpace::HoldingRegister => {
                vec![(raw >> 16) as u16, raw as u16]
            }
        };

        let id = self.mint_id();
        let write = PendingWrite {
            id,
            space,
            address,
            values,
        };

        match self.queue.submit(write, self.gate.connected()) {
            Submission::Dispatch(write) => {
                self.dispatch_write(write);
                Ok(id)
            }
            Submission::Enqueued => {
                debug!(
                    "write {id} for {} {circuit} queued ({} waiting)",
                    kind.as_str(),
                    self.queue.queued_len()
                );
                if self.gate.set_writes_idle(false) == Some(PollState::Stopped) {
                    debug!("polling suspended while writes are pending");
                }
                Ok(id)
            }
            Submission::Rejected => {
                warn!(
                    "write queue full ({} entries), rejecting write for {} {circuit}",
                    self.queue.capacity(),
                    kind.as_str()
                );
                Err(DriverError::QueueFull)
            }
        }
    }

    fn dispatch_write(&mut self, write: PendingWrite) {
        if self.gate.set_writes_idle(false) == Some(PollState::Stopped) {
            debug!("polling suspended while writes are pending");
        }
        let handle = self.transport.send_write(
            write.space,
            write.address,
            write.values.clone(),
            self.config.unit_id,
        );
        self.correlations.insert(
            write.id,
            PendingOp::Write {
                space: write.space,
                address: write.address,
                values: write.values,
            },
        );
        track(
            write.id,
            handle,
            self.config.write_timeout,
            self.completion_tx.clone(),
        );
        trace!("write {} dispatched", write.id);
    }

    fn read_circuit_now(&mut self, kind: RegisterKind, circuit: &str) -> DriverResult<()> {
        let address = self
            .map
            .address(kind, circuit)
            .ok_or_else(|| DriverError::UnknownCircuit {
                name: circuit.to_string(),
            })?;
        if !self.gate.connected() {
            return Err(DriverError::LinkUnavailable);
        }
        let count = match kind.space() {
            RegisterSpace::Coil => 1,
            RegisterSpace::InputRegister | RegisterSpace::HoldingRegister => 2,
        };
        self.request_read(kind.space(), ReadBlock { start: address, count });
        Ok(())
    }

    fn read_all_now(&mut self, kind: RegisterKind) -> DriverResult<()> {
        if !self.gate.connected() {
            return Err(DriverError::LinkUnavailable);
        }
        self.issue_kind_read(kind);
        Ok(())
    }

    // ===== Completions =====

    fn handle_completion(&mut self, completion: Completion) {
        let Some(op) = self.correlations.resolve(completion.id) else {
            trace!("late completion for unknown request {} ignored", completion.id);
            return;
        };
        match op {
            PendingOp::BlockRead { space, block } => {
                self.finish_read(completion.id, space, block, completion.outcome);
            }
            PendingOp::Write {
                space,
                address,
                values,
            } => {
                self.finish_write(completion.id, space, address, values, completion.outcome);
            }
        }
    }

    fn finish_read(&mut self, id: RequestId, space: RegisterSpace, block: ReadBlock, outcome: Outcome) {
        match outcome {
            Outcome::Success(values) => self.apply_read(space, block, &values),
            // Failed poll reads are not retried here; the next poll cycle
            // covers the same addresses again.
            Outcome::Protocol(message) => {
                warn!("read {id} protocol exception: {message}");
            }
            Outcome::Transport(message) => {
                warn!("read {id} transport failure: {message}");
            }
            Outcome::TimedOut => {
                warn!(
                    "read {id} got no response within {:?}",
                    self.config.read_timeout
                );
            }
        }
    }

    fn apply_read(&mut self, space: RegisterSpace, block: ReadBlock, values: &[u16]) {
        match space {
            RegisterSpace::Coil => self.apply_coil_read(block, values),
            RegisterSpace::InputRegister => {
                self.apply_register_read(RegisterKind::AnalogInput, block, values);
            }
            RegisterSpace::HoldingRegister => {
                self.apply_register_read(RegisterKind::AnalogOutput, block, values);
            }
        }
    }

    fn apply_coil_read(&mut self, block: ReadBlock, values: &[u16]) {
        for (offset, &raw) in values.iter().enumerate().take(block.count as usize) {
            let address = block.start.wrapping_add(offset as u16);
            let Some(changed) = self.coil_cache.observe(address, u32::from(raw != 0)) else {
                continue;
            };
            let value = changed != 0;
            if let Some(circuit) = self.map.circuit_at(RegisterKind::DigitalInput, address) {
                let circuit = circuit.to_string();
                self.emit(DriverEvent::DigitalInputChanged { circuit, value });
            }
            if let Some(circuit) = self.map.circuit_at(RegisterKind::DigitalOutput, address) {
                let circuit = circuit.to_string();
                self.emit(DriverEvent::DigitalOutputChanged { circuit, value });
            }
            if let Some(circuit) = self.map.circuit_at(RegisterKind::Indicator, address) {
                let circuit = circuit.to_string();
                self.emit(DriverEvent::IndicatorChanged { circuit, value });
            }
        }
    }

    fn apply_register_read(&mut self, kind: RegisterKind, block: ReadBlock, values: &[u16]) {
        for (offset, &high) in values.iter().enumerate().take(block.count as usize) {
            let address = block.start.wrapping_add(offset as u16);
            let Some(circuit) = self.map.circuit_at(kind, address).map(str::to_owned) else {
                continue;
            };
            // Both halves of the pair are always coalesced into the same
            // block, so the low half is the next value.
            let low = values.get(offset + 1).copied().unwrap_or(0);
            let combined = u32::from(high) << 16 | u32::from(low);
            let cache = match kind {
                RegisterKind::AnalogInput => &mut self.input_cache,
                _ => &mut self.holding_cache,
            };
            if let Some(value) = cache.observe(address, combined) {
                self.emit(match kind {
                    RegisterKind::AnalogInput => DriverEvent::AnalogInputChanged { circuit, value },
                    _ => DriverEvent::AnalogOutputChanged { circuit, value },
                });
            }
        }
    }

    fn finish_write(
        &mut self,
        id: RequestId,
        space: RegisterSpace,
        address: u16,
        values: Vec<u16>,
        outcome: Outcome,
    ) {
        match outcome {
            Outcome::Success(echo) => {
                self.emit(DriverEvent::WriteCompleted {
                    id,
                    success: true,
                    detail: None,
                });
                // Push the confirmed state through the cache so observers
                // see it without waiting for the next output poll.
                let registers = if echo.is_empty() { values } else { echo };
                self.apply_write_echo(space, address, &registers);
            }
            Outcome::Protocol(message) => {
                warn!("write {id} protocol exception: {message}");
                self.emit(DriverEvent::WriteCompleted {
                    id,
                    success: false,
                    detail: Some(message),
                });
            }
            Outcome::Transport(message) => {
                warn!("write {id} transport failure: {message}");
                self.emit(DriverEvent::WriteCompleted {
                    id,
                    success: false,
                    detail: Some(message),
                });
            }
            Outcome::TimedOut => {
                let detail = format!("no response within {:?}", self.config.write_timeout);
                warn!("write {id} {detail}");
                self.emit(DriverEvent::WriteCompleted {
                    id,
                    success: false,
                    detail: Some(detail),
                });
            }
        }

        self.queue.complete(id);
        if self.gate.connected() {
            if let Some(next) = self.queue.next_to_dispatch() {
                self.dispatch_write(next);
                return;
            }
        }
        if !self.queue.has_pending() {
            self.flush_deferred_reads();
            if self.gate.set_writes_idle(true) == Some(PollState::Running) {
                debug!("write queue drained, polling re-armed");
            }
        }
    }

    fn apply_write_echo(&mut self, space: RegisterSpace, address: u16, registers: &[u16]) {
        match space {
            RegisterSpace::Coil => {
                let raw = registers.first().copied().unwrap_or(0);
                let Some(changed) = self.coil_cache.observe(address, u32::from(raw != 0)) else {
                    return;
                };
                let value = changed != 0;
                if let Some(circuit) = self.map.circuit_at(RegisterKind::DigitalOutput, address) {
                    let circuit = circuit.to_string();
                    self.emit(DriverEvent::DigitalOutputChanged { circuit, value });
                }
                if let Some(circuit) = self.map.circuit_at(RegisterKind::Indicator, address) {
                    let circuit = circuit.to_string();
                    self.emit(DriverEvent::IndicatorChanged { circuit, value });
                }
            }
            RegisterSpace::HoldingRegister => {
                let high = registers.first().copied().unwrap_or(0);
                let low = registers.get(1).copied().unwrap_or(0);
                let combined = u32::from(high) << 16 | u32::from(low);
                let Some(circuit) = self
                    .map
                    .circuit_at(RegisterKind::AnalogOutput, address)
                    .map(str::to_owned)
                else {
                    return;
                };
                if let Some(value) = self.holding_cache.observe(address, combined) {
                    self.emit(DriverEvent::AnalogOutputChanged { circuit, value });
                }
            }
            // Input registers are read-only; writes never target them.
            RegisterSpace::InputRegister => {}
        }
    }

    // ===== Connectivity =====

    fn handle_link_change(&mut self, connected: bool) {
        if self.gate.connected() == connected {
            return;
        }
        match self.gate.set_connected(connected) {
            Some(PollState::Running) => debug!("link connected, polling started"),
            Some(PollState::Stopped) => debug!("link lost, polling stopped"),
            // The write queue still holds the gate; connectivity alone
            // changed.
            None => debug!("link connectivity now {connected}"),
        }
        self.emit(DriverEvent::LinkChanged { connected });

        if connected {
            // Writes held while the link was down drain now, in order.
            if let Some(next) = self.queue.next_to_dispatch() {
                self.dispatch_write(next);
            }
        }
    }
}
