/// Holding-register storage for the simulator
///
/// The bank is a plain owned value: the simulator's background task is its
/// only owner, so no locking happens here. Registers that were never written
/// read as zero. Addresses at or beyond `register_count` are rejected with
/// Illegal Data Address.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::{ModbusAddress, ModbusException, ModbusValue};

/// Full 16-bit address space
pub const DEFAULT_REGISTER_COUNT: u32 = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    holding_registers: HashMap<ModbusAddress, ModbusValue>,
    register_count: u32,
}

impl RegisterBank {
    /// Create an empty bank covering the whole address space
    pub fn new() -> Self {
        Self::with_register_count(DEFAULT_REGISTER_COUNT)
    }

    /// Create an empty bank answering only addresses below `register_count`
    pub fn with_register_count(register_count: u32) -> Self {
        Self {
            holding_registers: HashMap::new(),
            register_count: register_count.min(DEFAULT_REGISTER_COUNT),
        }
    }

    pub fn register_count(&self) -> u32 {
        self.register_count
    }

    fn check_range(&self, address: ModbusAddress, quantity: u16) -> Result<(), ModbusException> {
        if u32::from(address) + u32::from(quantity) > self.register_count {
            return Err(ModbusException::IllegalDataAddress);
        }
        Ok(())
    }

    /// Read holding registers starting at address (function code 0x03)
    pub fn read(&self, address: ModbusAddress, quantity: u16) -> Result<Vec<ModbusValue>, ModbusException> {
        self.check_range(address, quantity)?;
        Ok((0..quantity)
            .map(|offset| {
                self.holding_registers
                    .get(&(address + offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    /// Write single register (function code 0x06)
    pub fn write(&mut self, address: ModbusAddress, value: ModbusValue) -> Result<(), ModbusException> {
        self.check_range(address, 1)?;
        self.holding_registers.insert(address, value);
        Ok(())
    }

    /// Pre-seed registers; addresses outside the bank are skipped
    pub fn seed<I>(&mut self, values: I) -> usize
    where
        I: IntoIterator<Item = (ModbusAddress, ModbusValue)>,
    {
        values
            .into_iter()
            .filter(|&(address, value)| self.write(address, value).is_ok())
            .count()
    }

    /// Sorted copy of every register written so far
    pub fn snapshot(&self) -> BTreeMap<ModbusAddress, ModbusValue> {
        self.holding_registers.iter().map(|(&a, &v)| (a, v)).collect()
    }

    /// Number of registers holding a written value
    pub fn len(&self) -> usize {
        self.holding_registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holding_registers.is_empty()
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}
