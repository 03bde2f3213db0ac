use core::sync::atomic::{Ordering, fence};

use crate::{Register, RegisterFile, TX_BUFFER_SIZE, TxError, TxRing, tctl, tipg};

/// An attached E1000 with its transmit ring.
pub struct E1000<R: RegisterFile> {
    regs: R,
    ring: TxRing,
}

impl<R: RegisterFile> E1000<R> {
    /// Points the NIC at `ring` and enables the transmitter.
    pub fn attach(mut regs: R, ring: TxRing) -> Self {
        let base = ring.base();
        if !ring.is_hardware_sized() {
            log::warn!(
                "e1000: ring of {} bytes is not a multiple of {}",
                ring.byte_len(),
                crate::TDLEN_ALIGN
            );
        }
        regs.write(Register::Tdbal, base as u32);
        regs.write(Register::Tdbah, (base >> 32) as u32);
        regs.write(Register::Tdlen, ring.byte_len() as u32);
        regs.write(Register::Tdh, 0);
        regs.write(Register::Tdt, 0);
        regs.write(Register::Tctl, tctl::DEFAULT);
        regs.write(Register::Tipg, tipg::DEFAULT);

        log::info!(
            "e1000: {} tx descriptors at {:#x}, status {:#x}",
            ring.capacity(),
            base,
            regs.read(Register::Status)
        );
        Self { regs, ring }
    }

    /// Queues one packet at the ring tail without blocking.
    ///
    /// Packets longer than [`TX_BUFFER_SIZE`] are truncated. Returns the number
    /// of bytes queued, or [`TxError::RingFull`] when the tail slot has not
    /// been sent yet.
    pub fn transmit(&mut self, packet: &[u8]) -> Result<usize, TxError> {
        let raw_tail = self.regs.read(Register::Tdt);
        let tail = raw_tail as usize;
        let desc = self
            .ring
            .descriptor(tail)
            .ok_or(TxError::InvalidTail(raw_tail))?;
        if !desc.is_done() {
            log::trace!("e1000: slot {} still in flight", tail);
            return Err(TxError::RingFull);
        }

        let len = packet.len().min(TX_BUFFER_SIZE);
        self.ring.fill(tail, &packet[..len]);

        // Descriptor contents must be visible before the NIC sees the new tail.
        fence(Ordering::Release);
        let next = (tail + 1) % self.ring.capacity();
        self.regs.write(Register::Tdt, next as u32);

        log::trace!("e1000: queued {} bytes in slot {}", len, tail);
        Ok(len)
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn ring(&self) -> &TxRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut TxRing {
        &mut self.ring
    }
}
