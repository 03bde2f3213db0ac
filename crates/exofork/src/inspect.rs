//! Permission queries on the caller's own address space.

use crate::{PageFlags, PageNumber, VirtualAddress, syscall::PageTableView};

/// Per-page permission queries, available on every [`PageTableView`].
///
/// These are pure reads of the page table the kernel exposes to the caller;
/// there is no way to ask about another environment.
pub trait PermissionInspector: PageTableView {
    /// Returns the full permission bits of `page`.
    fn flags(&self, page: PageNumber) -> PageFlags {
        if !self.is_table_present(page.start()) {
            return PageFlags::empty();
        }
        self.table_entry(page)
    }

    /// Returns true if a page table covers `va`.
    fn is_table_present(&self, va: VirtualAddress) -> bool {
        self.directory_entry(va).is_present()
    }

    fn is_present(&self, page: PageNumber) -> bool {
        self.flags(page).is_present()
    }

    fn is_writable(&self, page: PageNumber) -> bool {
        self.flags(page).is_writable()
    }

    fn is_user(&self, page: PageNumber) -> bool {
        self.flags(page).is_user()
    }

    fn is_cow(&self, page: PageNumber) -> bool {
        self.flags(page).is_cow()
    }
}

impl<T: PageTableView + ?Sized> PermissionInspector for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout;

    /// A page table holding one read-only and one copy-on-write page.
    struct Snapshot;

    impl PageTableView for Snapshot {
        fn directory_entry(&self, va: VirtualAddress) -> PageFlags {
            if layout::pdx(va.as_usize()) == layout::pdx(layout::UTEXT) {
                PageFlags::USER_RW
            } else {
                PageFlags::empty()
            }
        }

        fn table_entry(&self, page: PageNumber) -> PageFlags {
            match page.start().as_usize() {
                layout::UTEXT => PageFlags::USER_RO,
                a if a == layout::UTEXT + layout::PAGE_SIZE => PageFlags::USER_COW,
                _ => PageFlags::empty(),
            }
        }
    }

    fn page(va: usize) -> PageNumber {
        VirtualAddress::new(va).page()
    }

    #[test]
    fn read_only_page() {
        let p = page(layout::UTEXT);
        assert!(Snapshot.is_present(p));
        assert!(Snapshot.is_user(p));
        assert!(!Snapshot.is_writable(p));
        assert!(!Snapshot.is_cow(p));
    }

    #[test]
    fn cow_page() {
        let p = page(layout::UTEXT + layout::PAGE_SIZE);
        assert!(Snapshot.is_cow(p));
        assert!(!Snapshot.is_writable(p));
    }

    #[test]
    fn missing_table_reads_as_empty() {
        let p = page(layout::USTACKTOP - layout::PAGE_SIZE);
        assert!(!Snapshot.is_table_present(p.start()));
        assert_eq!(Snapshot.flags(p), PageFlags::empty());
    }
}
