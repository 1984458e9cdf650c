//! The control transfer.

use x86_64::instructions::interrupts;
use yboot::entry::KernelEntryFn;
use yboot::BootRecord;

/// Something that can be jumped to with the record pointer.
pub trait KernelEntry {
    /// Transfers control. Never returns.
    ///
    /// # Safety
    ///
    /// The target must be a kernel entry point following the yboot calling
    /// convention, with its image loaded and the low 1 GiB identity mapped.
    /// `record` must be sealed.
    unsafe fn enter(self, record: *mut BootRecord) -> !;
}

/// A kernel entry point by address, e.g. the ELF header's `e_entry`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntryAddress(pub u64);

impl KernelEntry for EntryAddress {
    unsafe fn enter(self, record: *mut BootRecord) -> ! {
        // SAFETY: the caller guarantees this is the address of a function with
        // the entry signature.
        let entry: KernelEntryFn = unsafe { core::mem::transmute(self.0 as usize) };
        unsafe { entry.enter(record) }
    }
}

impl KernelEntry for KernelEntryFn {
    unsafe fn enter(self, record: *mut BootRecord) -> ! {
        interrupts::disable();
        log::trace!("jumping to kernel");
        self(record)
    }
}
