//! End-to-end scheduler tests against a scripted in-memory transport.
//!
//! The mock master keeps a register bank per register space. In auto mode
//! every request resolves immediately from the bank; in manual mode the
//! resolver slots are held so tests control completion order and timing.
//! All tests run on a paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use fieldio_modbus::{
    DriverConfig, DriverError, DriverEvent, ExtensionDriver, LinkState, ModbusMaster,
    RegisterKind, RegisterMap, RegisterMapTables, RegisterSpace, RequestHandle, RequestSlot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentRequest {
    is_write: bool,
    space: RegisterSpace,
    start: u16,
    count: u16,
    values: Vec<u16>,
}

struct MockMaster {
    link_tx: watch::Sender<LinkState>,
    auto_respond: AtomicBool,
    bank: Mutex<HashMap<(RegisterSpace, u16), u16>>,
    sent: Mutex<Vec<SentRequest>>,
    held: Mutex<Vec<(SentRequest, RequestSlot)>>,
}

impl MockMaster {
    fn new(connected: bool, auto_respond: bool) -> Arc<Self> {
        let state = if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        let (link_tx, _) = watch::channel(state);
        Arc::new(MockMaster {
            link_tx,
            auto_respond: AtomicBool::new(auto_respond),
            bank: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        })
    }

    fn set_link(&self, connected: bool) {
        let state = if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        let _ = self.link_tx.send(state);
    }

    fn set_register(&self, space: RegisterSpace, address: u16, value: u16) {
        self.bank.lock().unwrap().insert((space, address), value);
    }

    fn register(&self, space: RegisterSpace, address: u16) -> u16 {
        self.bank
            .lock()
            .unwrap()
            .get(&(space, address))
            .copied()
            .unwrap_or(0)
    }

    fn sent_len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn sent_since(&self, index: usize) -> Vec<SentRequest> {
        self.sent.lock().unwrap()[index..].to_vec()
    }

    fn held_write_len(&self) -> usize {
        self.held
            .lock()
            .unwrap()
            .iter()
            .filter(|(request, _)| request.is_write)
            .count()
    }

    /// Pop the oldest held write, apply it to the bank and echo it back.
    fn resolve_oldest_held_write(&self) {
        let mut held = self.held.lock().unwrap();
        let index = held
            .iter()
            .position(|(request, _)| request.is_write)
            .expect("no held write to resolve");
        let (request, slot) = held.remove(index);
        drop(held);

        let mut bank = self.bank.lock().unwrap();
        for (offset, &value) in request.values.iter().enumerate() {
            bank.insert((request.space, request.start + offset as u16), value);
        }
        slot.resolve(request.values);
    }
}

impl ModbusMaster for MockMaster {
    fn link_state(&self) -> LinkState {
        *self.link_tx.borrow()
    }

    fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }

    fn send_read(&self, space: RegisterSpace, start: u16, count: u16, _unit_id: u8) -> RequestHandle {
        let request = SentRequest {
            is_write: false,
            space,
            start,
            count,
            values: Vec::new(),
        };
        self.sent.lock().unwrap().push(request.clone());
        let (slot, handle) = RequestHandle::channel();
        if self.auto_respond.load(Ordering::SeqCst) {
            let bank = self.bank.lock().unwrap();
            let values = (0..count)
                .map(|offset| bank.get(&(space, start + offset)).copied().unwrap_or(0))
                .collect();
            slot.resolve(values);
        } else {
            self.held.lock().unwrap().push((request, slot));
        }
        handle
    }

    fn send_write(
        &self,
        space: RegisterSpace,
        start: u16,
        values: Vec<u16>,
        _unit_id: u8,
    ) -> RequestHandle {
        let request = SentRequest {
            is_write: true,
            space,
            start,
            count: values.len() as u16,
            values,
        };
        self.sent.lock().unwrap().push(request.clone());
        let (slot, handle) = RequestHandle::channel();
        if self.auto_respond.load(Ordering::SeqCst) {
            let mut bank = self.bank.lock().unwrap();
            for (offset, &value) in request.values.iter().enumerate() {
                bank.insert((space, start + offset as u16), value);
            }
            slot.resolve(request.values.clone());
        } else {
            self.held.lock().unwrap().push((request, slot));
        }
        handle
    }
}

/// One digital input at coil 5, one digital output at coil 6.
fn di_do_map() -> RegisterMap {
    let mut tables = RegisterMapTables::default();
    tables.digital_inputs.insert("1_01".to_string(), 5);
    tables.digital_outputs.insert("1_01".to_string(), 6);
    RegisterMap::new(tables).unwrap()
}

fn analog_map() -> RegisterMap {
    let mut tables = RegisterMapTables::default();
    tables.analog_inputs.insert("1_01".to_string(), 20);
    tables.analog_outputs.insert("1_01".to_string(), 40);
    RegisterMap::new(tables).unwrap()
}

async fn recv_event(events: &mut broadcast::Receiver<DriverEvent>) -> DriverEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_quiet(events: &mut broadcast::Receiver<DriverEvent>, window: Duration) {
    if let Ok(event) = tokio::time::timeout(window, events.recv()).await {
        panic!("expected no events, got {event:?}");
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test(start_paused = true)]
async fn change_events_only_on_transitions() {
    let transport = MockMaster::new(true, true);
    transport.set_register(RegisterSpace::Coil, 5, 1);

    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    // First poll cycle observes coil 5 high and coil 6 low: exactly one
    // change event per circuit.
    let first = recv_event(&mut events).await;
    let second = recv_event(&mut events).await;
    let got = [first, second];
    assert!(got.contains(&DriverEvent::DigitalInputChanged {
        circuit: "1_01".to_string(),
        value: true,
    }));
    assert!(got.contains(&DriverEvent::DigitalOutputChanged {
        circuit: "1_01".to_string(),
        value: false,
    }));

    // Identical responses on every following poll cycle emit nothing.
    assert_quiet(&mut events, Duration::from_secs(3)).await;

    // A real transition comes through on the next cycle.
    transport.set_register(RegisterSpace::Coil, 5, 0);
    assert_eq!(
        recv_event(&mut events).await,
        DriverEvent::DigitalInputChanged {
            circuit: "1_01".to_string(),
            value: false,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn write_completion_and_echo() {
    let transport = MockMaster::new(true, true);
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    let id = driver.write_digital("1_01", true).await.unwrap();

    // The completion event precedes the echoed state change.
    let mut saw_completion = false;
    loop {
        match recv_event(&mut events).await {
            DriverEvent::WriteCompleted {
                id: done,
                success,
                detail,
            } => {
                assert_eq!(done, id);
                assert!(success);
                assert_eq!(detail, None);
                saw_completion = true;
            }
            DriverEvent::DigitalOutputChanged { circuit, value } if value => {
                assert!(saw_completion, "echo arrived before the completion event");
                assert_eq!(circuit, "1_01");
                break;
            }
            _ => {}
        }
    }
    assert_eq!(transport.register(RegisterSpace::Coil, 6), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_circuit_is_rejected() {
    let transport = MockMaster::new(true, true);
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();

    let err = driver.write_digital("9_99", true).await.unwrap_err();
    assert_eq!(
        err,
        DriverError::UnknownCircuit {
            name: "9_99".to_string()
        }
    );

    let err = driver
        .read_circuit(RegisterKind::DigitalInput, "9_99")
        .await
        .unwrap_err();
    assert!(matches!(err, DriverError::UnknownCircuit { .. }));
}

#[tokio::test(start_paused = true)]
async fn queued_writes_run_in_fifo_order_and_overflow_is_rejected() {
    let transport = MockMaster::new(true, false);
    let config = DriverConfig::default()
        .with_write_queue_capacity(2)
        .with_write_timeout(Duration::from_secs(600));
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        config,
    )
    .unwrap();
    let mut events = driver.subscribe();

    // First write dispatches immediately, the next two fill the FIFO.
    let first = driver.write_digital("1_01", true).await.unwrap();
    let second = driver.write_digital("1_01", false).await.unwrap();
    let third = driver.write_digital("1_01", true).await.unwrap();
    assert!(first < second && second < third);

    // FIFO full: the fourth write never enters the system.
    let err = driver.write_digital("1_01", false).await.unwrap_err();
    assert_eq!(err, DriverError::QueueFull);

    // Drain: each completion dispatches the next write, in arrival order.
    let mut completed = Vec::new();
    for _ in 0..3 {
        wait_until(|| transport.held_write_len() == 1).await;
        transport.resolve_oldest_held_write();
        loop {
            if let DriverEvent::WriteCompleted { id, success, .. } = recv_event(&mut events).await {
                assert!(success);
                completed.push(id);
                break;
            }
        }
    }
    assert_eq!(completed, vec![first, second, third]);

    let writes: Vec<SentRequest> = transport
        .sent_since(0)
        .into_iter()
        .filter(|request| request.is_write)
        .collect();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].values, vec![1]);
    assert_eq!(writes[1].values, vec![0]);
    assert_eq!(writes[2].values, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn polling_pauses_while_a_write_is_pending() {
    let transport = MockMaster::new(true, false);
    let config = DriverConfig::default().with_write_timeout(Duration::from_secs(600));
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        config,
    )
    .unwrap();

    let _id = driver.write_digital("1_01", true).await.unwrap();
    wait_until(|| transport.held_write_len() == 1).await;

    // Several poll intervals pass; nothing at all goes on the wire while
    // the write is outstanding.
    let before = transport.sent_len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.sent_len(), before);

    // Completing the write re-arms polling.
    transport.resolve_oldest_held_write();
    wait_until(|| transport.sent_len() > before).await;
    let resumed = transport.sent_since(before);
    assert!(resumed.iter().any(|request| !request.is_write));
}

#[tokio::test(start_paused = true)]
async fn write_timeout_resolves_once_and_late_reply_is_ignored() {
    let transport = MockMaster::new(true, false);
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    let id = driver.write_digital("1_01", true).await.unwrap();
    wait_until(|| transport.held_write_len() == 1).await;

    // No resolution arrives; the 1 s write timeout fires.
    let completion = loop {
        match recv_event(&mut events).await {
            DriverEvent::WriteCompleted { id: done, success, detail } => {
                break (done, success, detail)
            }
            _ => {}
        }
    };
    assert_eq!(completion.0, id);
    assert!(!completion.1);
    assert!(completion.2.unwrap().contains("no response"));

    // The transport answers far too late: no second completion, no echo.
    transport.resolve_oldest_held_write();
    let mut quiet = driver.subscribe();
    assert_quiet(&mut quiet, Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn polling_follows_link_state() {
    let transport = MockMaster::new(false, true);
    transport.set_register(RegisterSpace::Coil, 5, 1);
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    // Disconnected: nothing is polled.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.sent_len(), 0);

    // On-demand reads are refused without a link.
    let err = driver
        .read_circuit(RegisterKind::DigitalInput, "1_01")
        .await
        .unwrap_err();
    assert_eq!(err, DriverError::LinkUnavailable);

    // Connect: notification, then polling starts and reports the input.
    transport.set_link(true);
    assert_eq!(
        recv_event(&mut events).await,
        DriverEvent::LinkChanged { connected: true }
    );
    loop {
        if let DriverEvent::DigitalInputChanged { circuit, value } = recv_event(&mut events).await {
            assert_eq!(circuit, "1_01");
            assert!(value);
            break;
        }
    }

    // Disconnect: notification, polling stops again.
    transport.set_link(false);
    assert_eq!(
        recv_event(&mut events).await,
        DriverEvent::LinkChanged { connected: false }
    );
    let before = transport.sent_len();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.sent_len(), before);
}

#[tokio::test(start_paused = true)]
async fn writes_submitted_offline_drain_on_reconnect() {
    let transport = MockMaster::new(false, true);
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    // Accepted into the queue, but held while the link is down.
    let id = driver.write_digital("1_01", true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.sent_len(), 0);

    transport.set_link(true);
    loop {
        match recv_event(&mut events).await {
            DriverEvent::WriteCompleted { id: done, success, .. } => {
                assert_eq!(done, id);
                assert!(success);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(transport.register(RegisterSpace::Coil, 6), 1);
}

#[tokio::test(start_paused = true)]
async fn analog_values_use_big_endian_register_pairs() {
    let transport = MockMaster::new(true, true);
    transport.set_register(RegisterSpace::InputRegister, 20, 0x0001);
    transport.set_register(RegisterSpace::InputRegister, 21, 0x0002);

    let driver = ExtensionDriver::start(
        analog_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();
    let mut events = driver.subscribe();

    // Poll read combines the pair high-half first.
    loop {
        if let DriverEvent::AnalogInputChanged { circuit, value } = recv_event(&mut events).await {
            assert_eq!(circuit, "1_01");
            assert_eq!(value, 0x0001_0002);
            break;
        }
    }

    // Writes split the value the same way.
    let id = driver.write_analog("1_01", 0x0003_0004).await.unwrap();
    loop {
        match recv_event(&mut events).await {
            DriverEvent::WriteCompleted { id: done, success, .. } => {
                assert_eq!(done, id);
                assert!(success);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(transport.register(RegisterSpace::HoldingRegister, 40), 0x0003);
    assert_eq!(transport.register(RegisterSpace::HoldingRegister, 41), 0x0004);

    loop {
        if let DriverEvent::AnalogOutputChanged { circuit, value } = recv_event(&mut events).await {
            assert_eq!(circuit, "1_01");
            assert_eq!(value, 0x0003_0004);
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn on_demand_read_is_independent_of_poll_timers() {
    let transport = MockMaster::new(true, true);
    transport.set_register(RegisterSpace::Coil, 5, 0);
    // Hour-long intervals: only the immediate first tick polls.
    let config = DriverConfig::default()
        .with_input_poll_interval(Duration::from_secs(3600))
        .with_output_poll_interval(Duration::from_secs(3600));
    let driver = ExtensionDriver::start(
        di_do_map(),
        transport.clone() as Arc<dyn ModbusMaster>,
        config,
    )
    .unwrap();
    let mut events = driver.subscribe();

    // Let the initial poll cycle run and settle.
    wait_until(|| transport.sent_len() >= 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The input flips, but no poll is due for an hour; an out-of-band read
    // picks it up now.
    transport.set_register(RegisterSpace::Coil, 5, 1);
    driver
        .read_circuit(RegisterKind::DigitalInput, "1_01")
        .await
        .unwrap();
    loop {
        // The initial poll reported the input low; wait for the transition.
        if let DriverEvent::DigitalInputChanged { circuit, value } = recv_event(&mut events).await {
            if value {
                assert_eq!(circuit, "1_01");
                break;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn read_all_coalesces_sparse_addresses() {
    let transport = MockMaster::new(true, true);
    let mut tables = RegisterMapTables::default();
    for (circuit, address) in [("1_01", 1), ("1_02", 2), ("1_03", 3), ("2_01", 7), ("2_02", 8), ("3_01", 10)] {
        tables.digital_inputs.insert(circuit.to_string(), address);
    }
    let map = RegisterMap::new(tables).unwrap();
    let driver = ExtensionDriver::start(
        map,
        transport.clone() as Arc<dyn ModbusMaster>,
        DriverConfig::default(),
    )
    .unwrap();

    // The immediate first input poll covers the set in exactly three reads.
    wait_until(|| transport.sent_len() >= 3).await;
    let mut reads: Vec<(u16, u16)> = transport
        .sent_since(0)
        .into_iter()
        .filter(|request| !request.is_write && request.space == RegisterSpace::Coil)
        .map(|request| (request.start, request.count))
        .collect();
    reads.sort_unstable();
    reads.dedup();
    assert_eq!(reads, vec![(1, 3), (7, 2), (10, 1)]);
}
