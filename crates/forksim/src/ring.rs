//! Transmit walkthrough: push packets through a ring while a simulated NIC
//! drains it.

use e1000::{E1000, TxError, TxRing, emulation::EmulatedRegisters};

pub struct RingOptions {
    pub capacity: usize,
    pub packets: usize,
    pub packet_size: usize,
    /// The NIC finishes one in-flight packet before every this many transmits.
    /// Zero means it never does.
    pub drain_every: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RingReport {
    pub sent: usize,
    pub ring_full: usize,
    pub bytes: usize,
}

pub fn run(options: &RingOptions) -> Result<RingReport, TxError> {
    // Host addresses stand in for physical ones.
    let ring = TxRing::new(options.capacity, |addr| addr as u64)?;
    let mut nic = E1000::attach(EmulatedRegisters::new(), ring);
    let payload = vec![0x5A; options.packet_size];

    let mut report = RingReport {
        sent: 0,
        ring_full: 0,
        bytes: 0,
    };
    let mut head = 0;
    let mut in_flight = 0;

    for n in 0..options.packets {
        if options.drain_every != 0 && n % options.drain_every == 0 && in_flight > 0 {
            nic.ring_mut().complete(head);
            head = (head + 1) % options.capacity;
            in_flight -= 1;
        }

        match nic.transmit(&payload) {
            Ok(len) => {
                report.sent += 1;
                report.bytes += len;
                in_flight += 1;
            }
            Err(TxError::RingFull) => report.ring_full += 1,
            Err(e) => return Err(e),
        }
    }

    log::info!(
        "e1000: {} sent, {} refused, {} in flight",
        report.sent,
        report.ring_full,
        in_flight
    );
    Ok(report)
}

pub fn print(report: &RingReport) {
    println!(
        "{} packets queued ({} bytes), {} refused with a full ring",
        report.sent, report.bytes, report.ring_full
    );
}
