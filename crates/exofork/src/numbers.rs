//! Page and frame number types.
//!
//! A [`PageNumber`] indexes the virtual pages of an address space (what the
//! reference kernel calls `PGNUM(va)`); a [`FrameNumber`] names a physical frame.

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    layout,
};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Macro to define common page/frame number functionality.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * layout::PAGE_SIZE)
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual page number within an environment's address space."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * layout::PAGE_SIZE)
    }

    /// Returns true if this page lies in the range fork replicates.
    #[inline]
    pub const fn is_below_stack_top(self) -> bool {
        self.0 < layout::USTACKTOP / layout::PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_address() {
        let frame = FrameNumber::new(3);
        assert_eq!(frame.start().as_usize(), 3 * layout::PAGE_SIZE);
    }

    #[test]
    fn page_of_unaligned_address() {
        let page = VirtualAddress::new(layout::UTEXT + 10).page();
        assert_eq!(page.start().as_usize(), layout::UTEXT);
    }

    #[test]
    fn stack_top_boundary() {
        let last = VirtualAddress::new(layout::USTACKTOP - 1).page();
        let first_excluded = VirtualAddress::new(layout::USTACKTOP).page();
        assert!(last.is_below_stack_top());
        assert!(!first_excluded.is_below_stack_top());
        assert!(!VirtualAddress::new(layout::UXSTACK_BOTTOM).page().is_below_stack_top());
    }

    #[test]
    fn arithmetic() {
        let page = PageNumber::new(10);
        assert_eq!((page + 5).as_usize(), 15);
        assert_eq!(PageNumber::new(10) - PageNumber::new(3), 7);
        assert!(PageNumber::new(5) < PageNumber::new(10));
    }
}
