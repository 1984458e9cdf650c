//! Kernel entry glue.
//!
//! The loader jumps to the kernel's ELF entry point with the record address
//! as the single argument (System V: in `rdi`), interrupts disabled and the
//! low 1 GiB identity mapped. [`entry_point!`](crate::entry_point) defines
//! that entry point, embeds the record template and runs validation before
//! any kernel code sees the hand-off data.

use x86_64::instructions::{hlt, interrupts};

use crate::info::BootInfo;
use crate::record::BootRecord;
use crate::validate::{self, ValidateError};

/// Signature of the kernel entry point as the loader calls it.
pub type KernelEntryFn = extern "C" fn(*mut BootRecord) -> !;

/// Signature of the function passed to [`entry_point!`](crate::entry_point).
pub type KernelMain = fn(BootInfo<'static>) -> !;

/// Validates and decodes the record at `record`.
///
/// # Safety
///
/// `record` must be the pointer the loader passed at entry, or point to a
/// record that stays valid and unmodified for the rest of the program.
pub unsafe fn boot_info(record: *const BootRecord) -> Result<BootInfo<'static>, ValidateError> {
    // SAFETY: forwarded to the caller.
    let validated = unsafe { validate::validate(record) }.inspect_err(|e| {
        log::error!("rejecting boot record at {:p}: {}", record, e);
    })?;
    Ok(validated.consume())
}

/// Stops the CPU for good.
pub fn halt() -> ! {
    loop {
        interrupts::disable();
        hlt();
    }
}

/// Defines the kernel's `_start` symbol and embeds the boot record template.
///
/// ```ignore
/// yboot::entry_point!(kernel_main, video = (1024, 768, yboot::PixelFormat::Rgb32));
///
/// fn kernel_main(info: yboot::BootInfo<'static>) -> ! {
///     // ...
/// }
/// ```
///
/// The template lives in `.data` so a loader scanning allocated writable
/// sections finds it. If validation fails the CPU is halted without calling
/// the kernel function; a mismatched record must not be read.
#[macro_export]
macro_rules! entry_point {
    ($path:path) => {
        $crate::entry_point!($path, video = (0, 0, $crate::PixelFormat::Rgb32));
    };
    ($path:path, video = ($width:expr, $height:expr, $format:expr)) => {
        #[used]
        #[no_mangle]
        #[link_section = ".data"]
        static mut __YBOOT_RECORD: $crate::BootRecord =
            $crate::BootRecord::kernel_template().with_video_request($width, $height, $format);

        #[export_name = "_start"]
        pub extern "C" fn __yboot_start(record: *mut $crate::BootRecord) -> ! {
            // Type check the kernel function.
            let main: $crate::entry::KernelMain = $path;

            // SAFETY: the loader hands over a pointer to the record, which
            // the kernel owns from here on.
            match unsafe { $crate::entry::boot_info(record) } {
                Ok(info) => main(info),
                Err(_) => $crate::entry::halt(),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::mem::size_of;
    use core::ptr;

    use pretty_assertions::assert_eq;
    use test_log::test;

    use crate::record::LOADER_MAGIC_V1;

    #[test]
    fn boot_info_from_valid_pointer() {
        // Leaked so the 'static borrow in BootInfo is sound.
        let record: &'static mut BootRecord = std::boxed::Box::leak(std::boxed::Box::new(
            BootRecord::kernel_template(),
        ));
        record.header.loader_magic = LOADER_MAGIC_V1;
        record.rsdp = 0xE_0000;

        let info = unsafe { boot_info(record) }.unwrap();
        assert_eq!(info.rsdp.map(|a| a.as_u64()), Some(0xE_0000));
    }

    #[test]
    fn boot_info_rejects_null_and_template() {
        assert_eq!(
            unsafe { boot_info(ptr::null()) }.unwrap_err(),
            ValidateError::Null
        );

        let record: &'static BootRecord =
            std::boxed::Box::leak(std::boxed::Box::new(BootRecord::kernel_template()));
        assert!(matches!(
            unsafe { boot_info(record) },
            Err(ValidateError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn entry_fn_is_a_plain_pointer() {
        assert_eq!(size_of::<KernelEntryFn>(), size_of::<u64>());
    }
}
