//! Page permission flags exchanged with the kernel.

use core::fmt;
use core::ops::BitOr;

use x86_64::structures::paging::PageTableFlags;

/// Permission bits of a page-table entry.
///
/// This wraps the x86_64 crate's page table entry flags. The low bits match the
/// hardware encoding; bit 11, one of the three bits the MMU leaves to software,
/// carries the copy-on-write tag.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Mapping is valid.
    pub const PRESENT: Self = Self(PageTableFlags::PRESENT);

    /// Writes are permitted.
    pub const WRITABLE: Self = Self(PageTableFlags::WRITABLE);

    /// Accessible from user mode.
    pub const USER: Self = Self(PageTableFlags::USER_ACCESSIBLE);

    /// Shared page that must be copied before it is written.
    pub const COW: Self = Self(PageTableFlags::BIT_11);

    /// All three software-available bits.
    pub const AVAILABLE: Self = Self(
        PageTableFlags::BIT_9
            .union(PageTableFlags::BIT_10)
            .union(PageTableFlags::BIT_11),
    );

    /// Present and user readable.
    pub const USER_RO: Self = Self(PageTableFlags::PRESENT.union(PageTableFlags::USER_ACCESSIBLE));

    /// Present, user readable and writable.
    pub const USER_RW: Self = Self(Self::USER_RO.0.union(PageTableFlags::WRITABLE));

    /// Present, user readable and tagged copy-on-write.
    pub const USER_COW: Self = Self(Self::USER_RO.0.union(PageTableFlags::BIT_11));

    /// Bits a user environment may pass to the page-mapping system calls.
    pub const SYSCALL: Self = Self(Self::USER_RW.0.union(Self::AVAILABLE.0));

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Creates page flags from a raw value, dropping unknown bits.
    pub const fn from_raw(raw: u64) -> Self {
        Self(PageTableFlags::from_bits_truncate(raw))
    }

    /// Returns the raw value of these flags.
    pub const fn to_raw(self) -> u64 {
        self.0.bits()
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0.contains(other.0)
    }

    /// Returns true if no bit outside `allowed` is set.
    pub const fn is_subset_of(self, allowed: Self) -> bool {
        allowed.0.contains(self.0)
    }

    /// Returns these flags with the bits of `other` cleared.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0.difference(other.0))
    }

    /// Returns whether the present bit is set.
    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the writable bit is set.
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Returns whether the copy-on-write tag is set.
    pub const fn is_cow(self) -> bool {
        self.contains(Self::COW)
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0.union(rhs.0))
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFlags({})", self)
    }
}

impl fmt::Display for PageFlags {
    /// Formats the flags as `P W U C`, with `-` for clear bits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            bit(self.is_present(), 'P'),
            bit(self.is_writable(), 'W'),
            bit(self.is_user(), 'U'),
            bit(self.is_cow(), 'C'),
        )
    }
}
