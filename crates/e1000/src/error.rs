use core::fmt;

/// Errors from building or using the transmit ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// The descriptor at the tail is still owned by the NIC. Retry later.
    RingFull,
    /// A ring must hold at least one descriptor and fit the length register.
    InvalidCapacity(usize),
    /// The device reported a tail index outside the ring.
    InvalidTail(u32),
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingFull => write!(f, "transmit ring is full"),
            Self::InvalidCapacity(capacity) => {
                write!(f, "invalid transmit ring capacity {}", capacity)
            }
            Self::InvalidTail(tail) => write!(f, "transmit tail {} is outside the ring", tail),
        }
    }
}

impl core::error::Error for TxError {}
