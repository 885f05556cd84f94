//! Circuit-name to register-address mappings.
//!
//! A field I/O module exposes its points through five register groups:
//! digital inputs, digital/relay outputs, analog inputs, analog outputs and
//! user-programmable indicator LEDs. Each point is identified by a symbolic
//! circuit name (e.g. `"1_01"`) that is unique within its group. The map is
//! built once from loader output and is read-only afterwards; both lookup
//! directions (name to address for dispatch, address to name for response
//! decoding) are materialized up front.

use std::collections::HashMap;

use crate::error::{DriverError, DriverResult};

/// Classification of one I/O point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// Digital (binary) input.
    DigitalInput,
    /// Digital or relay output.
    DigitalOutput,
    /// Analog input, reported as a 32-bit register pair.
    AnalogInput,
    /// Analog output, written as a 32-bit register pair.
    AnalogOutput,
    /// User-programmable indicator LED.
    Indicator,
}

impl RegisterKind {
    /// All kinds, in a fixed iteration order.
    pub const ALL: [RegisterKind; 5] = [
        RegisterKind::DigitalInput,
        RegisterKind::DigitalOutput,
        RegisterKind::AnalogInput,
        RegisterKind::AnalogOutput,
        RegisterKind::Indicator,
    ];

    /// The protocol register table this kind lives in.
    ///
    /// Digital points and indicators are coils; analog inputs live in the
    /// read-only input-register table, analog outputs in holding registers.
    pub fn space(self) -> RegisterSpace {
        match self {
            RegisterKind::DigitalInput | RegisterKind::DigitalOutput | RegisterKind::Indicator => {
                RegisterSpace::Coil
            }
            RegisterKind::AnalogInput => RegisterSpace::InputRegister,
            RegisterKind::AnalogOutput => RegisterSpace::HoldingRegister,
        }
    }

    /// Human-readable name used in log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            RegisterKind::DigitalInput => "digital input",
            RegisterKind::DigitalOutput => "digital output",
            RegisterKind::AnalogInput => "analog input",
            RegisterKind::AnalogOutput => "analog output",
            RegisterKind::Indicator => "indicator",
        }
    }
}

/// Protocol register table addressed by a read or write request.
///
/// Addresses are only unique within one space; the driver keeps separate
/// change caches per space for the same reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterSpace {
    /// Single-bit read/write table (digital I/O, indicators).
    Coil,
    /// Read-only 16-bit register table (analog inputs).
    InputRegister,
    /// Read/write 16-bit register table (analog outputs).
    HoldingRegister,
}

/// Loader output: five `circuit name -> address` tables.
///
/// Produced externally (see [`crate::descriptor`] for the descriptor-file
/// loader) and consumed once by [`RegisterMap::new`]. Groups a device does
/// not have simply stay empty.
#[derive(Debug, Clone, Default)]
pub struct RegisterMapTables {
    /// Digital input circuits.
    pub digital_inputs: HashMap<String, u16>,
    /// Digital and relay output circuits.
    pub digital_outputs: HashMap<String, u16>,
    /// Analog input circuits (address of the high half of the pair).
    pub analog_inputs: HashMap<String, u16>,
    /// Analog output circuits (address of the high half of the pair).
    pub analog_outputs: HashMap<String, u16>,
    /// User-programmable indicator circuits.
    pub indicators: HashMap<String, u16>,
}

/// One kind's bidirectional mapping.
#[derive(Debug, Default)]
struct KindMap {
    by_name: HashMap<String, u16>,
    by_address: HashMap<u16, String>,
}

impl KindMap {
    fn build(kind: RegisterKind, table: HashMap<String, u16>) -> DriverResult<Self> {
        let mut by_address = HashMap::with_capacity(table.len());
        for (name, &address) in &table {
            if let Some(previous) = by_address.insert(address, name.clone()) {
                return Err(DriverError::config_load(format!(
                    "duplicate {} address {} for circuits {} and {}",
                    kind.as_str(),
                    address,
                    previous,
                    name
                )));
            }
        }
        Ok(KindMap {
            by_name: table,
            by_address,
        })
    }
}

/// Immutable register map for one extension module.
#[derive(Debug)]
pub struct RegisterMap {
    digital_inputs: KindMap,
    digital_outputs: KindMap,
    analog_inputs: KindMap,
    analog_outputs: KindMap,
    indicators: KindMap,
}

impl RegisterMap {
    /// Build the map from loader output.
    ///
    /// Fails with [`DriverError::ConfigLoad`] if any kind contains duplicate
    /// addresses or if every table is empty; the driver must not start
    /// without a usable map.
    pub fn new(tables: RegisterMapTables) -> DriverResult<Self> {
        let map = RegisterMap {
            digital_inputs: KindMap::build(RegisterKind::DigitalInput, tables.digital_inputs)?,
            digital_outputs: KindMap::build(RegisterKind::DigitalOutput, tables.digital_outputs)?,
            analog_inputs: KindMap::build(RegisterKind::AnalogInput, tables.analog_inputs)?,
            analog_outputs: KindMap::build(RegisterKind::AnalogOutput, tables.analog_outputs)?,
            indicators: KindMap::build(RegisterKind::Indicator, tables.indicators)?,
        };
        if map.total_points() == 0 {
            return Err(DriverError::config_load("register map contains no circuits"));
        }
        Ok(map)
    }

    fn kind_map(&self, kind: RegisterKind) -> &KindMap {
        match kind {
            RegisterKind::DigitalInput => &self.digital_inputs,
            RegisterKind::DigitalOutput => &self.digital_outputs,
            RegisterKind::AnalogInput => &self.analog_inputs,
            RegisterKind::AnalogOutput => &self.analog_outputs,
            RegisterKind::Indicator => &self.indicators,
        }
    }

    /// Register address of a circuit, if the kind knows it.
    pub fn address(&self, kind: RegisterKind, circuit: &str) -> Option<u16> {
        self.kind_map(kind).by_name.get(circuit).copied()
    }

    /// Circuit name registered at an address, if any.
    pub fn circuit_at(&self, kind: RegisterKind, address: u16) -> Option<&str> {
        self.kind_map(kind).by_address.get(&address).map(String::as_str)
    }

    /// All circuit names of one kind, sorted for stable enumeration.
    pub fn circuits(&self, kind: RegisterKind) -> Vec<String> {
        let mut names: Vec<String> = self.kind_map(kind).by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// All register addresses of one kind, unsorted.
    pub fn addresses(&self, kind: RegisterKind) -> Vec<u16> {
        self.kind_map(kind).by_name.values().copied().collect()
    }

    /// Number of circuits of one kind.
    pub fn len(&self, kind: RegisterKind) -> usize {
        self.kind_map(kind).by_name.len()
    }

    /// True if the kind has no circuits.
    pub fn is_empty(&self, kind: RegisterKind) -> bool {
        self.kind_map(kind).by_name.is_empty()
    }

    /// Total number of circuits across all kinds.
    pub fn total_points(&self) -> usize {
        RegisterKind::ALL.iter().map(|&kind| self.len(kind)).sum()
    }
}
