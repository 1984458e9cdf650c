//! Consume: the kernel's typed view of a validated record.
//!
//! Zero addresses and sizes are normal "not provided" states and come out as
//! `None`; none of them is an error. The kernel branches on them explicitly.

use core::slice;

use x86_64::PhysAddr;

use crate::cmdline::CommandLine;
use crate::record::BootRecord;
use crate::validate::{ProtocolMismatch, ValidatedRecord};
use crate::video::VideoMode;

/// Everything the loader handed over, decoded.
#[derive(Clone, Copy, Debug)]
pub struct BootInfo<'a> {
    pub memory_map: Option<MemoryMap>,
    /// `None` if the loader could not set a video mode; fall back to a
    /// non-graphical console.
    pub video: Option<VideoMode>,
    pub elf: Option<ElfTables>,
    pub initrd: Option<Initrd>,
    /// Root system description pointer, if the firmware had one.
    pub rsdp: Option<PhysAddr>,
    pub cmdline: CommandLine<'a>,
}

/// Location and shape of the firmware memory map. The descriptor format is
/// the firmware's, not ours.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryMap {
    pub addr: PhysAddr,
    pub count: u32,
    /// Stride between descriptors in bytes.
    pub entry_size: u32,
}

impl MemoryMap {
    pub fn byte_len(&self) -> u64 {
        self.count as u64 * self.entry_size as u64
    }

    /// Iterates over the raw descriptors.
    ///
    /// # Safety
    ///
    /// The map must be readable at its physical address (i.e. still identity
    /// mapped) and not overwritten for `'b`.
    pub unsafe fn descriptors<'b>(&self) -> slice::ChunksExact<'b, u8> {
        // SAFETY: the caller guarantees the identity-mapped buffer is live.
        let bytes = unsafe {
            slice::from_raw_parts(self.addr.as_u64() as *const u8, self.byte_len() as usize)
        };
        bytes.chunks_exact(self.entry_size as usize)
    }
}

/// Where the loader left the kernel's own symbol and string tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ElfTables {
    /// The `.symtab` section header.
    pub symtab_hdr: PhysAddr,
    /// The `.symtab` contents.
    pub symtab_data: PhysAddr,
    /// The `.strtab` section header.
    pub strtab_hdr: PhysAddr,
    /// The `.strtab` contents.
    pub strtab_data: PhysAddr,
}

/// The initial ramdisk image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Initrd {
    pub base: PhysAddr,
    pub size: u64,
}

impl Initrd {
    /// # Safety
    ///
    /// The image must be readable at its physical address for `'b`. `base` is
    /// never zero for an initrd produced by [`ValidatedRecord::consume`].
    pub unsafe fn as_slice<'b>(&self) -> &'b [u8] {
        // SAFETY: forwarded to the caller.
        unsafe { slice::from_raw_parts(self.base.as_u64() as *const u8, self.size as usize) }
    }
}

/// Decodes an address cell. Zero is absent; so is anything that can't be a
/// physical address, since dereferencing it could not work either.
fn phys(field: &str, value: u64) -> Option<PhysAddr> {
    if value == 0 {
        return None;
    }

    match PhysAddr::try_new(value) {
        Ok(addr) => Some(addr),
        Err(_) => {
            log::warn!("boot record field {field} holds invalid address {value:#x}");
            None
        }
    }
}

impl<'a> ValidatedRecord<'a> {
    /// Decodes the record. This is the kernel's first read after
    /// [`BootRecord::validate`].
    pub fn consume(self) -> BootInfo<'a> {
        let record = self.record();

        let memory_map = match (record.memory_map_size, record.memory_map_entsize) {
            (0, _) => None,
            (_, 0) => {
                log::warn!("memory map has entries but zero stride; ignoring it");
                None
            }
            (count, entry_size) => phys("memory_map_data", record.memory_map_data).map(|addr| {
                MemoryMap {
                    addr,
                    count,
                    entry_size,
                }
            }),
        };

        let elf = (|| {
            Some(ElfTables {
                symtab_hdr: phys("elf_symtab_hdr", record.elf_symtab_hdr)?,
                symtab_data: phys("elf_symtab_data", record.elf_symtab_data)?,
                strtab_hdr: phys("elf_strtab_hdr", record.elf_strtab_hdr)?,
                strtab_data: phys("elf_strtab_data", record.elf_strtab_data)?,
            })
        })();

        // A zero size means absent whatever the base holds. A size without a
        // base is dropped like any other bad address.
        let initrd = match record.initrd_size {
            0 => None,
            size if record.initrd_base == 0 => {
                log::warn!("initrd of {size:#x} bytes has no base address; ignoring it");
                None
            }
            size => phys("initrd_base", record.initrd_base).map(|base| Initrd { base, size }),
        };

        let info = BootInfo {
            memory_map,
            video: record.read_video_grant(),
            elf,
            initrd,
            rsdp: phys("rsdp", record.rsdp),
            cmdline: CommandLine::new(&record.cmdline),
        };

        log::debug!("consumed boot record: {:?}", info);
        info
    }
}

impl BootRecord {
    /// [`Self::validate`] followed by [`ValidatedRecord::consume`].
    pub fn consume(&self) -> Result<BootInfo<'_>, ProtocolMismatch> {
        Ok(self.validate()?.consume())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::vec::Vec;

    use pretty_assertions::assert_eq;
    use test_log::test;

    use crate::cmdline;
    use crate::record::{KERNEL_MAGIC_V1, LOADER_MAGIC_V1};
    use crate::video::PixelFormat;

    fn handed_off() -> BootRecord {
        let mut record = BootRecord::kernel_template();
        record.header.loader_magic = LOADER_MAGIC_V1;
        record
    }

    #[test]
    fn minimal_record_has_nothing() {
        let record = handed_off();
        let info = record.consume().unwrap();

        assert_eq!(info.memory_map, None);
        assert_eq!(info.video, None);
        assert_eq!(info.elf, None);
        assert_eq!(info.initrd, None);
        assert_eq!(info.rsdp, None);
        assert!(info.cmdline.is_empty());
    }

    #[test]
    fn granted_bgr_mode_scenario() {
        let mut record = BootRecord::zeroed();
        record.header.kernel_magic = 0xA197A9B007B007;
        record.header.loader_magic = 0x700B700B9A791A;
        record.memory_map_data = 0x9000;
        record.memory_map_size = 3;
        record.memory_map_entsize = 48;
        record.request_video_mode(800, 600, PixelFormat::Bgr32);
        record.video_framebuffer = 0xFD00_0000;
        record.video_pitch = 800 * 4;

        let info = record.consume().unwrap();
        let video = info.video.unwrap();
        assert_eq!((video.width, video.height), (800, 600));
        assert_eq!(video.format.as_raw(), 1);
        assert_ne!(video.framebuffer, 0);
        assert_eq!(
            info.memory_map,
            Some(MemoryMap {
                addr: PhysAddr::new(0x9000),
                count: 3,
                entry_size: 48,
            })
        );
    }

    #[test]
    fn granted_rgb_mode_round_trip() {
        let mut record = handed_off();
        record.video_width = 1024;
        record.video_height = 768;
        record.video_format = 0;
        record.video_framebuffer = 0x8000_0000;
        record.video_pitch = 4096;

        let video = record.consume().unwrap().video.unwrap();
        assert_eq!(video.width, 1024);
        assert_eq!(video.height, 768);
        assert_eq!(video.format, PixelFormat::Rgb32);
        assert!(video.pitch >= video.width as u64 * 4);
    }

    #[test]
    fn refused_request_only_shows_as_zero_framebuffer() {
        let mut record = BootRecord::kernel_template();
        record.request_video_mode(1024, 768, PixelFormat::Rgb32);
        record.header.loader_magic = LOADER_MAGIC_V1;

        let info = record.consume().unwrap();
        assert_eq!(info.video, None);
        // The stale request is still sitting in the cells.
        assert_eq!(record.video_width, 1024);
    }

    #[test]
    fn initrd_is_gated_on_size() {
        let mut record = handed_off();
        record.initrd_base = 0x40_0000;
        record.initrd_size = 0;
        assert_eq!(record.consume().unwrap().initrd, None);

        record.initrd_base = 0;
        assert_eq!(record.consume().unwrap().initrd, None);

        record.initrd_size = 0x1000;
        assert_eq!(record.consume().unwrap().initrd, None);

        record.initrd_base = 0x40_0000;
        assert_eq!(
            record.consume().unwrap().initrd,
            Some(Initrd {
                base: PhysAddr::new(0x40_0000),
                size: 0x1000
            })
        );
    }

    #[test]
    fn elf_tables_need_all_four_pointers() {
        let mut record = handed_off();
        record.elf_symtab_hdr = 0x1000;
        record.elf_symtab_data = 0x2000;
        record.elf_strtab_hdr = 0x1040;
        assert_eq!(record.consume().unwrap().elf, None);

        record.elf_strtab_data = 0x3000;
        assert_eq!(
            record.consume().unwrap().elf,
            Some(ElfTables {
                symtab_hdr: PhysAddr::new(0x1000),
                symtab_data: PhysAddr::new(0x2000),
                strtab_hdr: PhysAddr::new(0x1040),
                strtab_data: PhysAddr::new(0x3000),
            })
        );
    }

    #[test]
    fn rsdp_present_and_invalid() {
        let mut record = handed_off();
        record.rsdp = 0xE_0000;
        assert_eq!(record.consume().unwrap().rsdp, Some(PhysAddr::new(0xE_0000)));

        record.rsdp = u64::MAX;
        assert_eq!(record.consume().unwrap().rsdp, None);
    }

    #[test]
    fn memory_map_with_zero_stride_is_ignored() {
        let mut record = handed_off();
        record.memory_map_data = 0x9000;
        record.memory_map_size = 4;
        record.memory_map_entsize = 0;
        assert_eq!(record.consume().unwrap().memory_map, None);
    }

    #[test]
    fn memory_map_descriptors() {
        // Three 24-byte descriptors; the first byte of each is its index.
        let mut storage = [0u64; 9];
        for i in 0..3 {
            storage[i * 3] = i as u64;
        }

        let mut record = handed_off();
        record.memory_map_data = storage.as_ptr() as u64;
        record.memory_map_size = 3;
        record.memory_map_entsize = 24;

        let map = record.consume().unwrap().memory_map.unwrap();
        let firsts: Vec<u8> = unsafe { map.descriptors() }.map(|d| d[0]).collect();
        assert_eq!(firsts, [0, 1, 2]);
        assert_eq!(map.byte_len(), 72);
    }

    #[test]
    fn initrd_contents() {
        let image = *b"070701 newc archive";

        let mut record = handed_off();
        record.initrd_base = image.as_ptr() as u64;
        record.initrd_size = image.len() as u64;

        let initrd = record.consume().unwrap().initrd.unwrap();
        assert_eq!(unsafe { initrd.as_slice() }, &image[..]);
    }

    #[test]
    fn command_line_comes_through() {
        let mut record = handed_off();
        cmdline::write(&mut record.cmdline, "init=/bin/sh");

        let info = record.consume().unwrap();
        assert_eq!(info.cmdline.value("init"), Some("/bin/sh"));
    }

    #[test]
    fn consume_refuses_mismatched_record() {
        let mut record = handed_off();
        record.rsdp = 0xE_0000;
        record.header.kernel_magic = KERNEL_MAGIC_V1 + 1;

        assert!(record.consume().is_err());
    }
}
