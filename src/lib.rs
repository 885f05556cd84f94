//! # Fieldio Modbus - Register-Access Scheduler for Field I/O Modules
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! An asynchronous driver core for field I/O expansion modules reachable
//! over a serial master-slave register protocol. It maps symbolic circuit
//! names (e.g. `"1_01"`) to protocol register addresses, polls input state
//! periodically, serializes output writes, and reports state transitions as
//! discrete events.
//!
//! ## Features
//!
//! - **Block-read coalescing**: sparse address sets are grouped into minimal
//!   contiguous bulk reads
//! - **Edge-triggered events**: a change cache suppresses repeated-value
//!   notifications from the fixed-frequency polls
//! - **Serialized writes**: a bounded FIFO executes writes one at a time and
//!   suspends polling while any write is pending (half-duplex discipline)
//! - **Correlated completions**: every request carries its own timeout and
//!   resolves to exactly one typed outcome
//! - **Transport-agnostic**: protocol framing stays behind the
//!   [`ModbusMaster`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldio_modbus::{
//!     DriverConfig, DriverEvent, DriverResult, ExtensionDriver, ModbusMaster, RegisterMap,
//!     RegisterMapTables,
//! };
//!
//! async fn run(transport: Arc<dyn ModbusMaster>) -> DriverResult<()> {
//!     // Normally loaded from descriptor files, see the `descriptor` module.
//!     let mut tables = RegisterMapTables::default();
//!     tables.digital_inputs.insert("1_01".to_string(), 4);
//!     tables.digital_outputs.insert("1_01".to_string(), 8);
//!     let map = RegisterMap::new(tables)?;
//!
//!     let driver = ExtensionDriver::start(map, transport, DriverConfig::default())?;
//!     let mut events = driver.subscribe();
//!
//!     let id = driver.write_digital("1_01", true).await?;
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DriverEvent::WriteCompleted { id: done, success, .. } if done == id => {
//!                 println!("write confirmed: {success}");
//!                 break;
//!             }
//!             DriverEvent::DigitalInputChanged { circuit, value } => {
//!                 println!("input {circuit} -> {value}");
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Circuit-name to register-address mappings
pub mod register_map;

/// Register-map loader for extension-module descriptor files
pub mod descriptor;

/// Contiguous block grouping for bulk reads
pub mod coalesce;

/// Edge detection over polled register values
pub mod change_cache;

/// Transport interface boundary
pub mod transport;

/// Request correlation and completion tracking
pub mod lifecycle;

/// Serialized, bounded write queue
pub mod queue;

/// Poll gating state machine
pub mod scheduler;

/// Extension-module driver: facade and scheduler worker
pub mod driver;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use fieldio_modbus::tokio) ===
pub use tokio;

// === Core driver API ===
pub use driver::{DriverConfig, DriverEvent, ExtensionDriver};

// === Error handling ===
pub use error::{DriverError, DriverResult};

// === Register map ===
pub use descriptor::{load_tables, ExtensionModel};
pub use register_map::{RegisterKind, RegisterMap, RegisterMapTables, RegisterSpace};

// === Scheduler building blocks ===
pub use change_cache::ChangeCache;
pub use coalesce::{coalesce, ReadBlock};
pub use lifecycle::{Completion, Correlations, Outcome, PendingOp, RequestId};
pub use queue::{PendingWrite, Submission, WriteQueue};
pub use scheduler::{PollGate, PollState};

// === Transport boundary ===
pub use transport::{LinkState, ModbusMaster, RequestHandle, RequestSlot, TransportFault};

// === Reference timing (commonly needed constants) ===
pub use driver::{
    DEFAULT_INPUT_POLL_MS, DEFAULT_OUTPUT_POLL_MS, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_WRITE_TIMEOUT_MS,
};
pub use queue::DEFAULT_WRITE_QUEUE_CAPACITY;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
