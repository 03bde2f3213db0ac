//! Software register file for running the driver without a device.

use alloc::{collections::BTreeMap, vec::Vec};

use crate::{Register, RegisterFile};

/// Status a QEMU 82540EM reports after reset: link up, full duplex, 1000 Mb/s.
pub const QEMU_STATUS: u32 = 0x8008_0783;

/// A register file backed by plain memory that records every write.
#[derive(Debug, Clone, Default)]
pub struct EmulatedRegisters {
    values: BTreeMap<Register, u32>,
    writes: Vec<(Register, u32)>,
}

impl EmulatedRegisters {
    /// Creates a register file in the state a freshly reset NIC presents.
    pub fn new() -> Self {
        let mut regs = Self::default();
        regs.values.insert(Register::Status, QEMU_STATUS);
        regs
    }

    /// Every write in the order the driver made it.
    pub fn writes(&self) -> &[(Register, u32)] {
        &self.writes
    }

    /// Sets a register as the device would, without recording a driver write.
    pub fn set(&mut self, reg: Register, value: u32) {
        self.values.insert(reg, value);
    }
}

impl RegisterFile for EmulatedRegisters {
    fn read(&self, reg: Register) -> u32 {
        self.values.get(&reg).copied().unwrap_or(0)
    }

    fn write(&mut self, reg: Register, value: u32) {
        self.values.insert(reg, value);
        self.writes.push((reg, value));
    }
}
