//! Legacy transmit descriptor layout.

use bitflags::bitflags;

/// Size of each packet buffer: the largest Ethernet frame without FCS.
pub const TX_BUFFER_SIZE: usize = 1518;

bitflags! {
    /// Command bits of a legacy transmit descriptor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct TxCommand: u8 {
        /// End of packet.
        const EOP = 1 << 0;
        /// Insert FCS.
        const IFCS = 1 << 1;
        /// Report status: the NIC sets `DD` once the descriptor is consumed.
        const RS = 1 << 3;
    }
}

bitflags! {
    /// Status bits written back by the NIC.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct TxStatus: u8 {
        /// Descriptor done; the slot may be reused.
        const DD = 1 << 0;
        /// Excess collisions.
        const EC = 1 << 1;
        /// Late collision.
        const LC = 1 << 2;
    }
}

/// A legacy transmit descriptor, as laid out in the ring the NIC reads.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    /// Physical address of the packet buffer.
    pub addr: u64,
    pub length: u16,
    /// Checksum offset.
    pub cso: u8,
    pub cmd: TxCommand,
    pub status: TxStatus,
    /// Checksum start.
    pub css: u8,
    pub special: u16,
}

impl TxDescriptor {
    /// Returns a descriptor pointing at `addr` that the driver may fill.
    pub fn free(addr: u64) -> Self {
        Self {
            addr,
            status: TxStatus::DD,
            ..Self::default()
        }
    }

    /// Returns true if the NIC is done with this descriptor.
    pub fn is_done(&self) -> bool {
        self.status.contains(TxStatus::DD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_layout() {
        assert_eq!(core::mem::size_of::<TxDescriptor>(), 16);
        assert_eq!(core::mem::align_of::<TxDescriptor>(), 16);
        assert_eq!(core::mem::offset_of!(TxDescriptor, cmd), 11);
        assert_eq!(core::mem::offset_of!(TxDescriptor, status), 12);
    }

    #[test]
    fn free_descriptor_is_done() {
        let desc = TxDescriptor::free(0x1000);
        assert!(desc.is_done());
        assert_eq!(desc.addr, 0x1000);
        assert_eq!(desc.length, 0);
    }

    #[test]
    fn clearing_done_keeps_other_status_bits() {
        let mut status = TxStatus::DD | TxStatus::LC;
        status.remove(TxStatus::DD);
        assert_eq!(status, TxStatus::LC);
    }
}
