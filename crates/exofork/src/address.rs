//! Address types for physical and virtual memory.
//!
//! Thin newtypes around `usize` so that user virtual addresses and physical
//! frame addresses cannot be mixed up at system-call boundaries.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PageNumber, layout};

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Returns true if the address is on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(layout::PAGE_SIZE)
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (layout::PAGE_SIZE - 1)
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

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
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

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Only the kernel deals in physical addresses; user code sees them at most as an\n\
     opaque frame identity in page-table entries."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }
}

impl_address_common!(
    VirtualAddress,
    "A user virtual address in the 32-bit address space of an environment."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit the 32-bit user address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            layout::validate_virtual(addr),
            "virtual address exceeds 32 bits"
        );
        Self(addr)
    }

    /// Returns the page containing this address.
    #[inline]
    pub const fn page(self) -> PageNumber {
        PageNumber::new(self.0 >> layout::PAGE_SHIFT)
    }

    /// Rounds the address down to the start of its page.
    #[inline]
    pub const fn page_start(self) -> Self {
        Self(layout::page_round_down(self.0))
    }

    /// Returns true if the address is below [`layout::UTOP`].
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < layout::UTOP
    }
}

impl From<usize> for VirtualAddress {
    #[inline]
    fn from(addr: usize) -> Self {
        Self::new(addr)
    }
}
