//! Human-readable views of records.

use std::fmt;

use yboot::{BootInfo, ProtocolMismatch};

/// What a kernel would see after consuming the record.
pub struct Report<'i, 'a>(pub &'i BootInfo<'a>);

impl fmt::Display for Report<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0;

        match &info.memory_map {
            Some(map) => writeln!(
                f,
                "memory map:  {} entries of {} bytes at {:#x}",
                map.count,
                map.entry_size,
                map.addr.as_u64()
            )?,
            None => writeln!(f, "memory map:  none")?,
        }

        match &info.video {
            Some(mode) => writeln!(
                f,
                "video:       {}x{} {:?}, framebuffer {:#x}, pitch {}",
                mode.width, mode.height, mode.format, mode.framebuffer, mode.pitch
            )?,
            None => writeln!(f, "video:       unavailable")?,
        }

        match &info.elf {
            Some(elf) => {
                writeln!(
                    f,
                    "symtab:      header {:#x}, data {:#x}",
                    elf.symtab_hdr.as_u64(),
                    elf.symtab_data.as_u64()
                )?;
                writeln!(
                    f,
                    "strtab:      header {:#x}, data {:#x}",
                    elf.strtab_hdr.as_u64(),
                    elf.strtab_data.as_u64()
                )?;
            }
            None => writeln!(f, "elf tables:  none")?,
        }

        match &info.initrd {
            Some(initrd) => writeln!(
                f,
                "initrd:      {:#x} bytes at {:#x}",
                initrd.size,
                initrd.base.as_u64()
            )?,
            None => writeln!(f, "initrd:      none")?,
        }

        match &info.rsdp {
            Some(rsdp) => writeln!(f, "rsdp:        {:#x}", rsdp.as_u64())?,
            None => writeln!(f, "rsdp:        none")?,
        }

        match info.cmdline.as_str() {
            Ok(text) => writeln!(f, "cmdline:     {:?}", text),
            Err(e) => writeln!(f, "cmdline:     unreadable ({})", e),
        }
    }
}

/// Which side of a mismatched record is at fault.
pub fn mismatch(err: &ProtocolMismatch) -> String {
    match (err.kernel_side_ok(), err.loader_side_ok()) {
        (true, false) => "the loader did not finish the record or speaks another protocol".into(),
        (false, true) => "the kernel was built for another protocol version".into(),
        _ => "neither magic matches; this is not a yboot record".into(),
    }
}
