//! Fixed user address-space layout shared by the kernel and user-level fork.
//!
//! The values follow the reference i386 exokernel: two-level paging with
//! 4 KiB pages, each page-directory entry covering 4 MiB.
//!
//! ```text
//!     UTOP, UXSTACKTOP -> +------------------------------+ 0xEEC0_0000
//!                         |     user exception stack     | PAGE_SIZE
//!                         +------------------------------+ 0xEEBF_F000
//!                         |        empty guard page      | PAGE_SIZE
//!            USTACKTOP -> +------------------------------+ 0xEEBF_E000
//!                         |      normal user stack       |
//!                         |              ...             |
//!                UTEXT -> +------------------------------+ 0x0080_0000
//!               PFTEMP -> |  fault-handler scratch slot  | 0x007F_F000
//!                         |              ...             |
//!                UTEMP -> +------------------------------+ 0x0040_0000
//!                         |         empty memory         |
//!                    0 -> +------------------------------+
//! ```

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: usize = 12;

/// Number of entries in a page table or page directory.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of address space mapped by a single page-directory entry (4 MiB).
pub const PT_SIZE: usize = PAGE_SIZE * ENTRIES_PER_TABLE;

/// log2 of [`PT_SIZE`].
pub const PDX_SHIFT: usize = 22;

/// Top of user-mappable memory. System calls refuse addresses at or above it.
pub const UTOP: usize = 0xEEC0_0000;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: usize = UTOP;

/// Top of the normal user stack. Fork replicates everything below this.
pub const USTACKTOP: usize = UTOP - 2 * PAGE_SIZE;

/// Conventional start of program text.
pub const UTEXT: usize = 2 * PT_SIZE;

/// Start of the temporary mapping region.
pub const UTEMP: usize = PT_SIZE;

/// Scratch slot the fault handler stages its private copy in.
pub const PFTEMP: usize = UTEMP + PT_SIZE - PAGE_SIZE;

/// Lowest address of the user exception stack page.
pub const UXSTACK_BOTTOM: usize = UXSTACKTOP - PAGE_SIZE;

/// Returns the page-directory index of an address.
#[inline]
pub const fn pdx(address: usize) -> usize {
    (address >> PDX_SHIFT) & (ENTRIES_PER_TABLE - 1)
}

/// Returns the page-table index of an address.
#[inline]
pub const fn ptx(address: usize) -> usize {
    (address >> PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
}

/// Rounds an address down to the start of its page.
#[inline]
pub const fn page_round_down(address: usize) -> usize {
    address & !(PAGE_SIZE - 1)
}

/// Validates a user virtual address.
///
/// Addresses must fit the 32-bit address space of the reference machine.
#[inline]
pub const fn validate_virtual(address: usize) -> bool {
    address <= u32::MAX as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_slot_sits_below_text() {
        assert_eq!(PFTEMP, 0x007F_F000);
        assert_eq!(PFTEMP + PAGE_SIZE, UTEXT);
    }

    #[test]
    fn exception_stack_is_above_fork_boundary() {
        assert_eq!(USTACKTOP, 0xEEBF_E000);
        assert!(UXSTACK_BOTTOM >= USTACKTOP);
        assert_eq!(UXSTACK_BOTTOM - USTACKTOP, PAGE_SIZE);
    }

    #[test]
    fn directory_and_table_indices() {
        assert_eq!(pdx(UTOP), 0x3BB);
        assert_eq!(ptx(USTACKTOP), 0x3FE);
        assert_eq!(pdx(PFTEMP), 1);
        assert_eq!(ptx(PFTEMP), 0x3FF);
    }

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x0080_0123), 0x0080_0000);
        assert_eq!(page_round_down(0x0080_0000), 0x0080_0000);
    }
}
