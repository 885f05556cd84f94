//! Register-map loader for extension-module descriptor files.
//!
//! Each extension model ships two comma-separated descriptor files: one for
//! the coil table (digital inputs, digital/relay outputs, user LEDs) and one
//! for the register tables (analog input/output values). Only rows of the
//! `Basic` group are mapped; the circuit name is the last token of the coil
//! description or the fourth token of the register description. Any missing
//! file or malformed row fails the whole load; the driver never starts with
//! a partial map.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::register_map::RegisterMapTables;

/// Supported extension-module models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionModel {
    /// xS10 model.
    Xs10,
    /// xS20 model.
    Xs20,
    /// xS30 model.
    Xs30,
    /// xS40 model.
    Xs40,
    /// xS50 model.
    Xs50,
}

impl ExtensionModel {
    /// Model name as printed on the device.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionModel::Xs10 => "xS10",
            ExtensionModel::Xs20 => "xS20",
            ExtensionModel::Xs30 => "xS30",
            ExtensionModel::Xs40 => "xS40",
            ExtensionModel::Xs50 => "xS50",
        }
    }

    /// Relative path of the coil descriptor file for this model.
    pub fn coil_descriptor(self) -> String {
        format!(
            "Neuron_{model}/Neuron_{model}-Coils-group-1.csv",
            model = self.as_str()
        )
    }

    /// Relative path of the register descriptor file for this model.
    pub fn register_descriptor(self) -> String {
        format!(
            "Neuron_{model}/Neuron_{model}-Registers-group-1.csv",
            model = self.as_str()
        )
    }
}

/// Minimum column count of a coil descriptor row.
const COIL_ROW_COLUMNS: usize = 5;
/// Minimum column count of a register descriptor row.
const REGISTER_ROW_COLUMNS: usize = 7;

/// Parse coil descriptor text into `tables`.
///
/// Recognized `Basic` rows: `Digital Input`, `Digital Output`, `Relay
/// Output` (folded into digital outputs) and `User Programmable LED`.
pub fn parse_coil_descriptors(text: &str, tables: &mut RegisterMapTables) -> DriverResult<()> {
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let columns: Vec<&str> = line.split(',').collect();
        if columns.len() < COIL_ROW_COLUMNS {
            return Err(DriverError::config_load(format!(
                "corrupted coil descriptor row: {line}"
            )));
        }
        if columns[4] != "Basic" {
            continue;
        }

        let address = parse_address(columns[0], line)?;
        let description = columns[3];
        let Some(circuit) = description.split_whitespace().last() else {
            continue;
        };

        let lowered = description.to_lowercase();
        if lowered.contains("digital input") {
            debug!("found digital input register {circuit} at {address}");
            tables.digital_inputs.insert(circuit.to_string(), address);
        } else if lowered.contains("digital output") || lowered.contains("relay output") {
            debug!("found digital output register {circuit} at {address}");
            tables.digital_outputs.insert(circuit.to_string(), address);
        } else if lowered.contains("user programmable led") {
            debug!("found user programmable led {circuit} at {address}");
            tables.indicators.insert(circuit.to_string(), address);
        }
    }
    Ok(())
}

/// Parse register descriptor text into `tables`.
///
/// Recognized `Basic` rows: `Analog Input Value` and `Analog Output Value`.
pub fn parse_register_descriptors(text: &str, tables: &mut RegisterMapTables) -> DriverResult<()> {
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let columns: Vec<&str> = line.split(',').collect();
        if columns.len() < REGISTER_ROW_COLUMNS {
            return Err(DriverError::config_load(format!(
                "corrupted register descriptor row: {line}"
            )));
        }
        if columns.last().copied() != Some("Basic") {
            continue;
        }

        let description = columns[5];
        let tokens: Vec<&str> = description.split_whitespace().collect();
        if tokens.len() <= 3 {
            warn!("skipping register row with short description: {description}");
            continue;
        }

        let address = parse_address(columns[0], line)?;
        let circuit = tokens[3];
        let lowered = description.to_lowercase();
        if lowered.contains("analog input value") {
            debug!("found analog input register {circuit} at {address}");
            tables.analog_inputs.insert(circuit.to_string(), address);
        } else if lowered.contains("analog output value") {
            debug!("found analog output register {circuit} at {address}");
            tables.analog_outputs.insert(circuit.to_string(), address);
        }
    }
    Ok(())
}

fn parse_address(raw: &str, line: &str) -> DriverResult<u16> {
    raw.trim().parse().map_err(|_| {
        DriverError::config_load(format!("invalid register address {raw:?} in row: {line}"))
    })
}

/// Load both descriptor files of a model from `descriptor_dir`.
///
/// Fatal on any missing file or malformed row ([`DriverError::ConfigLoad`]).
pub fn load_tables(model: ExtensionModel, descriptor_dir: &Path) -> DriverResult<RegisterMapTables> {
    let mut tables = RegisterMapTables::default();

    let coil_path = descriptor_dir.join(model.coil_descriptor());
    debug!("loading coil descriptors from {}", coil_path.display());
    let text = fs::read_to_string(&coil_path).map_err(|err| {
        DriverError::config_load(format!("{}: {err}", coil_path.display()))
    })?;
    parse_coil_descriptors(&text, &mut tables)?;

    let register_path = descriptor_dir.join(model.register_descriptor());
    debug!("loading register descriptors from {}", register_path.display());
    let text = fs::read_to_string(&register_path).map_err(|err| {
        DriverError::config_load(format!("{}: {err}", register_path.display()))
    })?;
    parse_register_descriptors(&text, &mut tables)?;

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COILS: &str = "\
0,RW,1,Digital Input 1_01,Basic
1,RW,1,Digital Input 1_02,Basic
8,RW,1,Digital Output 1_01,Basic
9,RW,1,Relay Output 2_01,Basic
16,RW,1,User Programmable LED 1_01,Basic
100,RW,1,Firmware Switch,Advanced
";

    const REGISTERS: &str = "\
20,RO,2,10000,none,Analog Input Value AI 1_01,Basic
22,RO,2,10000,none,Analog Input Value AI 1_02,Basic
40,RW,2,10000,none,Analog Output Value AO 1_01,Basic
90,RO,1,10000,none,Internal Temperature Sensor CPU,Advanced
";

    #[test]
    fn test_parse_coil_descriptors() {
        let mut tables = RegisterMapTables::default();
        parse_coil_descriptors(COILS, &mut tables).unwrap();

        assert_eq!(tables.digital_inputs.get("1_01"), Some(&0));
        assert_eq!(tables.digital_inputs.get("1_02"), Some(&1));
        assert_eq!(tables.digital_outputs.get("1_01"), Some(&8));
        // Relay outputs land in the digital output table.
        assert_eq!(tables.digital_outputs.get("2_01"), Some(&9));
        assert_eq!(tables.indicators.get("1_01"), Some(&16));
        // Non-Basic rows are ignored.
        assert_eq!(tables.digital_inputs.len(), 2);
    }

    #[test]
    fn test_parse_register_descriptors() {
        let mut tables = RegisterMapTables::default();
        parse_register_descriptors(REGISTERS, &mut tables).unwrap();

        assert_eq!(tables.analog_inputs.get("1_01"), Some(&20));
        assert_eq!(tables.analog_inputs.get("1_02"), Some(&22));
        assert_eq!(tables.analog_outputs.get("1_01"), Some(&40));
        assert!(tables.analog_outputs.get("CPU").is_none());
    }

    #[test]
    fn test_short_coil_row_is_fatal() {
        let mut tables = RegisterMapTables::default();
        let err = parse_coil_descriptors("0,RW,1\n", &mut tables).unwrap_err();
        assert!(matches!(err, DriverError::ConfigLoad { .. }));
    }

    #[test]
    fn test_bad_address_is_fatal() {
        let mut tables = RegisterMapTables::default();
        let err =
            parse_coil_descriptors("abc,RW,1,Digital Input 1_01,Basic\n", &mut tables).unwrap_err();
        assert!(matches!(err, DriverError::ConfigLoad { .. }));
    }

    #[test]
    fn test_missing_descriptor_file_is_fatal() {
        let err = load_tables(ExtensionModel::Xs10, Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, DriverError::ConfigLoad { .. }));
    }

    #[test]
    fn test_descriptor_paths_per_model() {
        assert_eq!(
            ExtensionModel::Xs30.coil_descriptor(),
            "Neuron_xS30/Neuron_xS30-Coils-group-1.csv"
        );
        assert_eq!(
            ExtensionModel::Xs50.register_descriptor(),
            "Neuron_xS50/Neuron_xS50-Registers-group-1.csv"
        );
    }
}
