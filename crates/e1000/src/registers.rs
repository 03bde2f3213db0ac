//! Device registers and how to reach them.

use core::ptr::NonNull;

/// Registers the transmit path touches, by byte offset into BAR 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Register {
    /// Device status.
    Status = 0x0008,
    /// Transmit control.
    Tctl = 0x0400,
    /// Transmit inter-packet gap.
    Tipg = 0x0410,
    /// Descriptor ring base address, low 32 bits.
    Tdbal = 0x3800,
    /// Descriptor ring base address, high 32 bits.
    Tdbah = 0x3804,
    /// Descriptor ring length in bytes.
    Tdlen = 0x3808,
    /// Descriptor head, advanced by the NIC.
    Tdh = 0x3810,
    /// Descriptor tail, advanced by the driver.
    Tdt = 0x3818,
}

impl Register {
    pub const fn offset(self) -> usize {
        self as u32 as usize
    }
}

/// Transmit control (TCTL) fields.
pub mod tctl {
    /// Transmitter enable.
    pub const EN: u32 = 1 << 1;
    /// Pad short packets.
    pub const PSP: u32 = 1 << 3;
    /// Collision threshold field.
    pub const CT: u32 = 0x0000_0FF0;
    /// Collision distance field.
    pub const COLD: u32 = 0x003F_F000;

    /// Enabled, padding short packets, collision threshold 0x10 and full-duplex
    /// collision distance 0x40.
    pub const DEFAULT: u32 = EN | PSP | (CT & (0x10 << 4)) | (COLD & (0x40 << 12));
}

/// Transmit inter-packet gap (TIPG) fields.
pub mod tipg {
    pub const IPGT: u32 = 10;
    pub const IPGR1: u32 = 8 << 10;
    pub const IPGR2: u32 = 12 << 20;

    /// IEEE 802.3 recommended gaps for copper.
    pub const DEFAULT: u32 = IPGT | IPGR1 | IPGR2;
}

/// 32-bit register access.
pub trait RegisterFile {
    fn read(&self, reg: Register) -> u32;
    fn write(&mut self, reg: Register, value: u32);
}

/// Registers reached through a memory-mapped BAR.
pub struct Mmio {
    base: NonNull<u32>,
}

impl Mmio {
    /// Wraps a mapped register window.
    ///
    /// # Safety
    /// `base` must point at the device's BAR 0, mapped uncached, covering at
    /// least every [`Register`] offset, for as long as this value lives.
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base: base.cast() }
    }

    fn register(&self, reg: Register) -> *mut u32 {
        // SAFETY: offsets are within the window promised to `new`.
        unsafe { self.base.as_ptr().add(reg.offset() / 4) }
    }
}

impl RegisterFile for Mmio {
    fn read(&self, reg: Register) -> u32 {
        // SAFETY: see `Mmio::new`.
        unsafe { core::ptr::read_volatile(self.register(reg)) }
    }

    fn write(&mut self, reg: Register, value: u32) {
        // SAFETY: see `Mmio::new`.
        unsafe { core::ptr::write_volatile(self.register(reg), value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_values() {
        assert_eq!(tctl::DEFAULT, 0x0004_010A);
        assert_eq!(tipg::DEFAULT, 0x00C0_200A);
    }

    #[test]
    fn mmio_uses_byte_offsets() {
        let mut window = alloc::vec![0u32; Register::Tdt.offset() / 4 + 1];
        let base = NonNull::new(window.as_mut_ptr().cast::<u8>()).unwrap();
        // SAFETY: the window covers every register offset.
        let mut regs = unsafe { Mmio::new(base) };

        regs.write(Register::Tdt, 3);
        regs.write(Register::Status, 0x80);
        assert_eq!(regs.read(Register::Tdt), 3);
        drop(regs);

        assert_eq!(window[0x3818 / 4], 3);
        assert_eq!(window[0x8 / 4], 0x80);
    }
}
