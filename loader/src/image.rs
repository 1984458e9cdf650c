//! Reading what the loader needs out of the kernel's ELF image.

use core::mem::align_of;

use x86_64::PhysAddr;
use xmas_elf::header::{Class, Machine};
use xmas_elf::program::Type as SegmentType;
use xmas_elf::sections::{SectionHeader, ShType, SHF_ALLOC, SHF_WRITE};
use xmas_elf::ElfFile;
use yboot::{BootRecord, ElfTables, KERNEL_MAGIC_V1};

use crate::physmem::{Address, Extent, PAGE_SIZE};

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ImageError {
    #[error("malformed ELF: {0}")]
    Malformed(&'static str),
    #[error("kernel is not a 64-bit ELF")]
    NotElf64,
    #[error("kernel is not built for x86_64")]
    WrongMachine,
    #[error("kernel has no loadable segments")]
    NoLoadSegments,
    #[error("no boot record found in any writable data section")]
    NoRecord,
    #[error("boot record at {0:#x} is not inside a loaded segment")]
    RecordNotLoaded(u64),
    #[error("symbol table links to section {0}, which is not a string table")]
    BadStrtabLink(u32),
    #[error("address overflow computing a table location")]
    AddressOverflow,
}

/// Where the kernel's embedded record lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordLocation {
    /// Link-time address.
    pub vaddr: u64,
    /// Where it ends up once the segments are loaded.
    pub paddr: u64,
    /// Offset into the file.
    pub offset: u64,
}

/// A parsed kernel image. Borrows the raw file bytes.
pub struct KernelImage<'a> {
    elf: ElfFile<'a>,
}

impl<'a> KernelImage<'a> {
    /// Checks that `bytes` is an x86_64 ELF64 image.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ImageError> {
        let elf = ElfFile::new(bytes).map_err(ImageError::Malformed)?;

        if elf.header.pt1.class() != Class::SixtyFour {
            return Err(ImageError::NotElf64);
        }
        if elf.header.pt2.machine().as_machine() != Machine::X86_64 {
            return Err(ImageError::WrongMachine);
        }

        Ok(KernelImage { elf })
    }

    pub fn entry_point(&self) -> u64 {
        self.elf.header.pt2.entry_point()
    }

    /// Physical span of all loadable segments, widened to whole pages.
    pub fn extent(&self) -> Result<Extent, ImageError> {
        let mut span: Option<(u64, u64)> = None;
        for segment in self.elf.program_iter() {
            if segment.get_type() != Ok(SegmentType::Load) || segment.mem_size() == 0 {
                continue;
            }
            let start = segment.physical_addr();
            let end = start
                .checked_add(segment.mem_size())
                .ok_or(ImageError::AddressOverflow)?;
            span = Some(match span {
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
                None => (start, end),
            });
        }

        let (start, end) = span.ok_or(ImageError::NoLoadSegments)?;
        let start = Address::from_raw(start).align_down(PAGE_SIZE);
        let end = Address::from_raw(end)
            .align_up(PAGE_SIZE)
            .ok_or(ImageError::AddressOverflow)?;
        Extent::from_bounds(start, end).ok_or(ImageError::NoLoadSegments)
    }

    /// Maps a link-time address to where the segment holding it is loaded.
    pub fn virt_to_phys(&self, vaddr: u64) -> Option<u64> {
        self.elf
            .program_iter()
            .filter(|s| s.get_type() == Ok(SegmentType::Load))
            .find(|s| {
                vaddr >= s.virtual_addr() && vaddr - s.virtual_addr() < s.mem_size()
            })
            .map(|s| s.physical_addr() + (vaddr - s.virtual_addr()))
    }

    /// Finds the record template the kernel embedded.
    ///
    /// Only allocated, writable `PROGBITS` sections big enough for a record are
    /// searched, at record-aligned addresses, for the kernel magic.
    pub fn locate_record(&self) -> Result<RecordLocation, ImageError> {
        let magic = KERNEL_MAGIC_V1.to_le_bytes();
        let align = align_of::<BootRecord>() as u64;

        for section in self.elf.section_iter() {
            if section.get_type() != Ok(ShType::ProgBits)
                || section.flags() & (SHF_ALLOC | SHF_WRITE) != SHF_ALLOC | SHF_WRITE
                || section.size() < BootRecord::SIZE as u64
            {
                continue;
            }

            let in_file = section
                .offset()
                .checked_add(section.size())
                .is_some_and(|end| end <= self.elf.input.len() as u64);
            if !in_file {
                return Err(ImageError::Malformed("section runs past the end of the file"));
            }

            let data = section.raw_data(&self.elf);
            let skip = (align - section.address() % align) % align;
            let found = (skip as usize..=data.len().saturating_sub(BootRecord::SIZE))
                .step_by(align as usize)
                .find(|&i| data.get(i..i + magic.len()) == Some(&magic[..]));

            if let Some(i) = found {
                let vaddr = section.address() + i as u64;
                let paddr = self
                    .virt_to_phys(vaddr)
                    .ok_or(ImageError::RecordNotLoaded(vaddr))?;
                log::debug!("boot record at {:#x} (physical {:#x})", vaddr, paddr);
                return Ok(RecordLocation {
                    vaddr,
                    paddr,
                    offset: section.offset() + i as u64,
                });
            }
        }

        Err(ImageError::NoRecord)
    }

    /// The record template as stored in the file, including the kernel's
    /// video request.
    pub fn record_template(&self, location: &RecordLocation) -> Option<BootRecord> {
        let start = location.offset as usize;
        let bytes = self.elf.input.get(start..start + BootRecord::SIZE)?;
        Some(BootRecord::from_bytes(bytes.try_into().ok()?))
    }

    /// Record values for the kernel's `.symtab` and `.strtab`, given that the
    /// raw file is kept at `file_phys`. `None` for a stripped kernel.
    pub fn elf_tables(&self, file_phys: u64) -> Result<Option<ElfTables>, ImageError> {
        let Some((symtab_index, symtab)) = self
            .elf
            .section_iter()
            .enumerate()
            .find(|(_, s)| s.get_type() == Ok(ShType::SymTab))
        else {
            return Ok(None);
        };

        let strtab_index = symtab.link();
        if strtab_index >= self.elf.header.pt2.sh_count() as u32 {
            return Err(ImageError::Malformed("symbol table links past the section headers"));
        }
        let strtab = self
            .elf
            .section_header(strtab_index as u16)
            .map_err(ImageError::Malformed)?;
        if strtab.get_type() != Ok(ShType::StrTab) {
            return Err(ImageError::BadStrtabLink(strtab_index));
        }

        let header = |index: u64| -> Result<PhysAddr, ImageError> {
            let offset = index
                .checked_mul(self.elf.header.pt2.sh_entry_size() as u64)
                .and_then(|o| o.checked_add(self.elf.header.pt2.sh_offset()));
            phys(file_phys, offset)
        };
        let contents = |section: &SectionHeader| phys(file_phys, Some(section.offset()));

        Ok(Some(ElfTables {
            symtab_hdr: header(symtab_index as u64)?,
            symtab_data: contents(&symtab)?,
            strtab_hdr: header(strtab_index as u64)?,
            strtab_data: contents(&strtab)?,
        }))
    }
}

fn phys(base: u64, offset: Option<u64>) -> Result<PhysAddr, ImageError> {
    offset
        .and_then(|o| base.checked_add(o))
        .and_then(|a| PhysAddr::try_new(a).ok())
        .ok_or(ImageError::AddressOverflow)
}
