//! Human-readable address formatting for page-table dumps and log lines.

use core::fmt;

use crate::VirtualAddress;

/// Wraps an address and formats it as an uppercase hexadecimal value with `0x` prefix
/// and `_` digit separators every 4 digits.
///
/// # Examples
///
/// ```
/// use exofork::HumanAddress;
///
/// assert_eq!(format!("{}", HumanAddress(0x0)), "0x0");
/// assert_eq!(format!("{}", HumanAddress(0x7F_F000)), "0x7F_F000");
/// assert_eq!(format!("{}", HumanAddress(0xEEBF_E000)), "0xEEBF_E000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanAddress(pub usize);

impl From<usize> for HumanAddress {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<VirtualAddress> for HumanAddress {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        Self(value.as_usize())
    }
}

impl fmt::Display for HumanAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value == 0 {
            return write!(f, "0x0");
        }

        let digits = (usize::BITS - value.leading_zeros()).div_ceil(4) as usize;
        write!(f, "0x")?;
        for index in (0..digits).rev() {
            let nibble = (value >> (index * 4)) & 0xF;
            write!(f, "{:X}", nibble)?;
            if index != 0 && index % 4 == 0 {
                write!(f, "_")?;
            }
        }

        Ok(())
    }
}
