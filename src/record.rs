//! Binary layout of the hand-off record.
//!
//! Field order, widths and offsets are the protocol. Changing any of them
//! requires new magic values. Each field documents who writes it; the record's
//! memory is not protected, so the ownership rules below are a contract.

use core::mem::{align_of, size_of};

use memoffset::offset_of;
use static_assertions::const_assert_eq;

/// Magic identifying the protocol version the kernel was built against.
pub const KERNEL_MAGIC_V1: u64 = 0xA197A9B007B007;

/// Magic identifying the protocol version the loader speaks.
pub const LOADER_MAGIC_V1: u64 = 0x700B700B9A791A;

/// Size of the command line buffer, including the terminating NUL.
pub const CMDLINE_SIZE: usize = 256;

/// The two protocol identifiers. Not a checksum.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecordHeader {
    /// Written into the kernel image at build time, or by the loader into
    /// fresh memory.
    pub kernel_magic: u64,
    /// Written by the loader as its very last store to the record.
    pub loader_magic: u64,
}

/// The hand-off record.
///
/// One instance exists per boot. It is either embedded in the kernel image
/// (see [`BootRecord::kernel_template`]) or allocated by the loader, and the
/// memory stays valid until the kernel has copied out what it needs.
///
/// Every address is a physical address inside the identity-mapped low memory
/// the loader guarantees, or zero for "not provided". Ownership of the record
/// and of every buffer it points to moves to the kernel at the control
/// transfer, all at once.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootRecord {
    pub header: RecordHeader,

    /// Loader: address of a dense array of firmware memory descriptors.
    pub memory_map_data: u64,
    /// Loader: number of descriptors in the array.
    pub memory_map_size: u32,
    /// Loader: stride between descriptors in bytes. Not an input channel.
    pub memory_map_entsize: u32,

    /// Kernel request, then loader grant. See [`crate::video`].
    pub video_width: u32,
    pub video_height: u32,
    pub video_format: u32,
    pub _pad0: u32,
    /// Loader: linear framebuffer address, zero if no mode was set.
    pub video_framebuffer: u64,
    /// Loader: bytes per scanline.
    pub video_pitch: u64,

    /// Loader: section header and contents of the kernel's `.symtab`.
    pub elf_symtab_hdr: u64,
    pub elf_symtab_data: u64,
    /// Loader: section header and contents of the kernel's `.strtab`.
    pub elf_strtab_hdr: u64,
    pub elf_strtab_data: u64,

    /// Loader: ramdisk location. Absent iff `initrd_size` is zero.
    pub initrd_base: u64,
    pub initrd_size: u64,

    /// Loader: ACPI root system description pointer, zero if not found.
    pub rsdp: u64,

    /// Loader: NUL-terminated argument string. See [`crate::cmdline`].
    pub cmdline: [u8; CMDLINE_SIZE],
}

const_assert_eq!(size_of::<RecordHeader>(), 16);
const_assert_eq!(size_of::<BootRecord>(), 376);
const_assert_eq!(align_of::<BootRecord>(), 8);

impl BootRecord {
    /// Size of the record in bytes.
    pub const SIZE: usize = size_of::<BootRecord>();

    /// An all-zero record. Neither magic is set, so it does not validate.
    pub const fn zeroed() -> Self {
        BootRecord {
            header: RecordHeader {
                kernel_magic: 0,
                loader_magic: 0,
            },
            memory_map_data: 0,
            memory_map_size: 0,
            memory_map_entsize: 0,
            video_width: 0,
            video_height: 0,
            video_format: 0,
            _pad0: 0,
            video_framebuffer: 0,
            video_pitch: 0,
            elf_symtab_hdr: 0,
            elf_symtab_data: 0,
            elf_strtab_hdr: 0,
            elf_strtab_data: 0,
            initrd_base: 0,
            initrd_size: 0,
            rsdp: 0,
            cmdline: [0; CMDLINE_SIZE],
        }
    }

    /// The record a kernel embeds in its image: only the kernel magic is set.
    ///
    /// The loader finds the record by scanning the image for this magic, so
    /// the template must live in an allocated, writable data section.
    pub const fn kernel_template() -> Self {
        let mut record = Self::zeroed();
        record.header.kernel_magic = KERNEL_MAGIC_V1;
        record
    }

    /// The raw memory image of the record, exactly as the other side sees it.
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        // SAFETY: `BootRecord` is `repr(C)` with no padding (every field is
        // naturally aligned and the size assertion above pins the total), so
        // all of its bytes are initialized.
        unsafe { &*(self as *const BootRecord as *const [u8; Self::SIZE]) }
    }

    /// Reads a record back from its raw memory image.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        // SAFETY: every field is an integer or a byte array, so any bit
        // pattern is a valid record. The read tolerates any alignment.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const BootRecord) }
    }
}

impl Default for BootRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

// Field offsets are part of the ABI.
const _: () = {
    assert!(offset_of!(BootRecord, header) == 0);
    assert!(offset_of!(RecordHeader, kernel_magic) == 0);
    assert!(offset_of!(RecordHeader, loader_magic) == 8);
    assert!(offset_of!(BootRecord, memory_map_data) == 16);
    assert!(offset_of!(BootRecord, memory_map_size) == 24);
    assert!(offset_of!(BootRecord, memory_map_entsize) == 28);
    assert!(offset_of!(BootRecord, video_width) == 32);
    assert!(offset_of!(BootRecord, video_height) == 36);
    assert!(offset_of!(BootRecord, video_format) == 40);
    assert!(offset_of!(BootRecord, _pad0) == 44);
    assert!(offset_of!(BootRecord, video_framebuffer) == 48);
    assert!(offset_of!(BootRecord, video_pitch) == 56);
    assert!(offset_of!(BootRecord, elf_symtab_hdr) == 64);
    assert!(offset_of!(BootRecord, elf_symtab_data) == 72);
    assert!(offset_of!(BootRecord, elf_strtab_hdr) == 80);
    assert!(offset_of!(BootRecord, elf_strtab_data) == 88);
    assert!(offset_of!(BootRecord, initrd_base) == 96);
    assert!(offset_of!(BootRecord, initrd_size) == 104);
    assert!(offset_of!(BootRecord, rsdp) == 112);
    assert!(offset_of!(BootRecord, cmdline) == 120);
};

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn magic_byte_order() {
        let record = BootRecord::kernel_template();
        let bytes = record.as_bytes();

        assert_eq!(
            bytes[0..8],
            [0x07, 0xB0, 0x07, 0xB0, 0xA9, 0x97, 0xA1, 0x00]
        );
        // The loader magic is not part of the template.
        assert_eq!(bytes[8..16], [0; 8]);

        let mut record = record;
        record.header.loader_magic = LOADER_MAGIC_V1;
        assert_eq!(
            record.as_bytes()[8..16],
            [0x1A, 0x79, 0x9A, 0x0B, 0x70, 0x0B, 0x70, 0x00]
        );
    }

    #[test]
    fn template_is_otherwise_empty() {
        let record = BootRecord::kernel_template();
        assert!(record.as_bytes()[16..].iter().all(|&b| b == 0));
        assert_eq!(BootRecord::default(), BootRecord::zeroed());
    }

    #[test]
    fn field_bytes_land_at_their_offsets() {
        let mut record = BootRecord::zeroed();
        record.video_width = 0x0403_0201;
        record.rsdp = 0xE0000;
        record.cmdline[0] = b'q';

        let bytes = record.as_bytes();
        assert_eq!(bytes[32..36], [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(u64::from_le_bytes(bytes[112..120].try_into().unwrap()), 0xE0000);
        assert_eq!(bytes[120], b'q');
        assert_eq!(bytes.len(), 376);
    }

    #[test]
    fn from_bytes_reads_what_as_bytes_shows() {
        let mut record = BootRecord::kernel_template();
        record.initrd_size = 0x2000;
        record.cmdline[..5].copy_from_slice(b"quiet");

        let mut image = [0u8; BootRecord::SIZE + 1];
        image[1..].copy_from_slice(record.as_bytes());
        let unaligned: &[u8; BootRecord::SIZE] = image[1..].try_into().unwrap();

        assert_eq!(BootRecord::from_bytes(unaligned), record);
    }
}
