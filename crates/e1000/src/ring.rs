use alloc::{boxed::Box, vec};

use crate::{TX_BUFFER_SIZE, TxCommand, TxDescriptor, TxError, TxStatus};

/// Largest ring the 20-bit descriptor length register can describe while
/// staying a multiple of [`TDLEN_ALIGN`].
const MAX_DESCRIPTORS: usize =
    ((1 << 20) - TDLEN_ALIGN) / core::mem::size_of::<TxDescriptor>();

/// The NIC requires the ring length in bytes to be a multiple of this.
pub const TDLEN_ALIGN: usize = 128;

/// The transmit descriptor ring and its packet buffers.
///
/// Descriptor `i` always points at buffer `i`. Both live on the heap and never
/// move, so the physical addresses recorded at construction stay valid for the
/// ring's lifetime.
pub struct TxRing {
    descriptors: Box<[TxDescriptor]>,
    buffers: Box<[[u8; TX_BUFFER_SIZE]]>,
    base: u64,
}

impl TxRing {
    /// Builds a ring of `capacity` free descriptors.
    ///
    /// `virt_to_phys` translates a kernel virtual address to the physical
    /// address the NIC will DMA from.
    ///
    /// Real hardware also needs the ring's byte length to be a multiple of
    /// [`TDLEN_ALIGN`], so a ring behind [`Mmio`](crate::Mmio) should hold a
    /// multiple of 8 descriptors. Smaller rings are accepted for emulated
    /// register files; [`is_hardware_sized`](Self::is_hardware_sized) tells the
    /// two apart.
    pub fn new(capacity: usize, virt_to_phys: impl Fn(usize) -> u64) -> Result<Self, TxError> {
        if capacity == 0 || capacity > MAX_DESCRIPTORS {
            return Err(TxError::InvalidCapacity(capacity));
        }

        let buffers = vec![[0u8; TX_BUFFER_SIZE]; capacity].into_boxed_slice();
        let descriptors: Box<[TxDescriptor]> = buffers
            .iter()
            .map(|buffer| TxDescriptor::free(virt_to_phys(buffer.as_ptr() as usize)))
            .collect();
        let base = virt_to_phys(descriptors.as_ptr() as usize);

        Ok(Self {
            descriptors,
            buffers,
            base,
        })
    }

    pub fn capacity(&self) -> usize {
        self.descriptors.len()
    }

    /// Physical address of the first descriptor.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Size of the descriptor array in bytes.
    pub fn byte_len(&self) -> usize {
        self.capacity() * core::mem::size_of::<TxDescriptor>()
    }

    /// Returns true if the NIC can use this ring length as is.
    pub fn is_hardware_sized(&self) -> bool {
        self.byte_len() % TDLEN_ALIGN == 0
    }

    pub fn descriptor(&self, index: usize) -> Option<&TxDescriptor> {
        self.descriptors.get(index)
    }

    /// Returns the packet currently queued in slot `index`.
    pub fn packet(&self, index: usize) -> Option<&[u8]> {
        let len = usize::from(self.descriptors.get(index)?.length);
        Some(&self.buffers[index][..len])
    }

    /// Copies `packet` into slot `index` and hands the slot to the NIC.
    ///
    /// The packet must already be clamped to [`TX_BUFFER_SIZE`].
    pub(crate) fn fill(&mut self, index: usize, packet: &[u8]) {
        self.buffers[index][..packet.len()].copy_from_slice(packet);
        let desc = &mut self.descriptors[index];
        desc.length = packet.len() as u16;
        desc.cmd = TxCommand::RS | TxCommand::EOP;
        desc.status.remove(TxStatus::DD);
    }

    /// Marks slot `index` as consumed, as the NIC does after sending it.
    pub fn complete(&mut self, index: usize) {
        if let Some(desc) = self.descriptors.get_mut(index) {
            desc.status.insert(TxStatus::DD);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(addr: usize) -> u64 {
        addr as u64
    }

    #[test]
    fn descriptors_start_free_and_point_at_buffers() {
        let ring = TxRing::new(4, identity).unwrap();
        assert_eq!(ring.capacity(), 4);
        assert_eq!(ring.byte_len(), 64);
        assert_eq!(ring.base() % 16, 0);

        for i in 0..4 {
            let desc = ring.descriptor(i).unwrap();
            assert!(desc.is_done());
            assert_eq!(desc.addr, ring.buffers[i].as_ptr() as u64);
        }
    }

    #[test]
    fn translation_is_applied() {
        let ring = TxRing::new(2, |addr| addr as u64 + 0x1_0000_0000).unwrap();
        assert!(ring.base() >= 0x1_0000_0000);
        assert!(ring.descriptor(1).unwrap().addr >= 0x1_0000_0000);
    }

    #[test]
    fn rejects_empty_ring() {
        assert_eq!(
            TxRing::new(0, identity).err(),
            Some(TxError::InvalidCapacity(0))
        );
    }

    #[test]
    fn rejects_ring_longer_than_tdlen() {
        assert!(MAX_DESCRIPTORS * core::mem::size_of::<TxDescriptor>() < 1 << 20);
        assert_eq!(MAX_DESCRIPTORS % 8, 0);
        assert_eq!(
            TxRing::new(MAX_DESCRIPTORS + 1, identity).err(),
            Some(TxError::InvalidCapacity(MAX_DESCRIPTORS + 1))
        );
        assert_eq!(
            TxRing::new(65536, identity).err(),
            Some(TxError::InvalidCapacity(65536))
        );
    }

    #[test]
    fn hardware_sizing() {
        assert!(!TxRing::new(4, identity).unwrap().is_hardware_sized());
        assert!(TxRing::new(8, identity).unwrap().is_hardware_sized());
    }

    #[test]
    fn fill_and_complete() {
        let mut ring = TxRing::new(2, identity).unwrap();
        ring.fill(1, b"frame");

        let desc = ring.descriptor(1).unwrap();
        assert!(!desc.is_done());
        assert_eq!(desc.cmd, TxCommand::RS | TxCommand::EOP);
        assert_eq!(ring.packet(1).unwrap(), b"frame");

        ring.complete(1);
        assert!(ring.descriptor(1).unwrap().is_done());
    }
}
