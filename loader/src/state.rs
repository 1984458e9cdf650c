//! The loader's side of the record lifecycle.
//!
//! ```text
//! Loader<Unpopulated> --open--> Loader<RequestOpen> --grant_video--> Loader<Populating>
//!     --seal--> Sealed --transfer--> kernel
//! ```
//!
//! Every step takes `self` by value, so no state can be revisited and nothing
//! can write to a sealed record.

use core::convert::Infallible;
use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

use x86_64::PhysAddr;
use yboot::{
    cmdline, BootRecord, ElfTables, Initrd, MemoryMap, VideoMode, VideoRequest, KERNEL_MAGIC_V1,
    LOADER_MAGIC_V1,
};

use crate::config::LoaderConfig;
use crate::handoff::KernelEntry;
use crate::video::{self, VideoBackend};

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LoaderError {
    #[error("kernel speaks boot protocol {found:#x}, expected {expected:#x}", expected = KERNEL_MAGIC_V1)]
    KernelProtocol { found: u64 },
    #[error("{field} has a nonzero size but no address")]
    MissingAddress { field: &'static str },
    #[error("memory map has entries but a zero stride")]
    ZeroStride,
    #[error("{field} wraps around the address space")]
    AddressOverflow { field: &'static str },
    #[error("{field} ends at {end:#x}, past the identity-mapped limit {limit:#x}")]
    OutsideIdentityMap {
        field: &'static str,
        end: u64,
        limit: u64,
    },
}

/// Everything the loader writes in its final pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct Resources<'a> {
    pub memory_map: Option<MemoryMap>,
    pub elf: Option<ElfTables>,
    pub initrd: Option<Initrd>,
    pub rsdp: Option<PhysAddr>,
    pub cmdline: &'a str,
}

impl Resources<'_> {
    /// Checks every region against the identity mapping before anything is
    /// written.
    fn check(&self, limit: u64) -> Result<(), LoaderError> {
        if let Some(map) = &self.memory_map {
            if map.count != 0 {
                if map.entry_size == 0 {
                    return Err(LoaderError::ZeroStride);
                }
                if map.addr.as_u64() == 0 {
                    return Err(LoaderError::MissingAddress {
                        field: "memory map",
                    });
                }
            }
            check_region("memory map", map.addr.as_u64(), map.byte_len(), limit)?;
        }

        if let Some(elf) = &self.elf {
            for (field, addr) in [
                ("symtab header", elf.symtab_hdr),
                ("symtab", elf.symtab_data),
                ("strtab header", elf.strtab_hdr),
                ("strtab", elf.strtab_data),
            ] {
                check_region(field, addr.as_u64(), 1, limit)?;
            }
        }

        if let Some(initrd) = &self.initrd {
            if initrd.size != 0 && initrd.base.as_u64() == 0 {
                return Err(LoaderError::MissingAddress { field: "initrd" });
            }
            check_region("initrd", initrd.base.as_u64(), initrd.size, limit)?;
        }

        if let Some(rsdp) = self.rsdp {
            check_region("rsdp", rsdp.as_u64(), 1, limit)?;
        }

        Ok(())
    }
}

fn check_region(field: &'static str, addr: u64, len: u64, limit: u64) -> Result<(), LoaderError> {
    let end = addr
        .checked_add(len)
        .ok_or(LoaderError::AddressOverflow { field })?;
    if end > limit {
        return Err(LoaderError::OutsideIdentityMap { field, end, limit });
    }
    Ok(())
}

/// Nothing has been checked yet.
pub struct Unpopulated;

/// The kernel's video request may be read.
pub struct RequestOpen;

/// The video grant is done; the remaining fields are next.
pub struct Populating {
    video: Option<VideoMode>,
}

pub struct Loader<'r, S> {
    record: &'r mut BootRecord,
    state: S,
}

impl<'r> Loader<'r, Unpopulated> {
    /// Takes over `record`: the template embedded in the kernel image, or
    /// fresh memory the loader allocated.
    pub fn new(record: &'r mut BootRecord) -> Self {
        Loader {
            record,
            state: Unpopulated,
        }
    }

    /// Checks the kernel magic and clears every loader-owned field, leaving
    /// only the kernel's video request.
    pub fn open(self) -> Result<Loader<'r, RequestOpen>, LoaderError> {
        let record = self.record;

        match record.header.kernel_magic {
            KERNEL_MAGIC_V1 => {}
            0 => {
                log::debug!("record is fresh memory; writing kernel magic");
                record.header.kernel_magic = KERNEL_MAGIC_V1;
            }
            found => return Err(LoaderError::KernelProtocol { found }),
        }

        let request = record.video_request();
        *record = BootRecord::kernel_template();
        record.request_video_mode_raw(request.width, request.height, request.raw_format);

        Ok(Loader {
            record,
            state: RequestOpen,
        })
    }
}

impl<'r> Loader<'r, RequestOpen> {
    /// What the kernel asked for.
    pub fn request(&self) -> VideoRequest {
        self.record.video_request()
    }

    /// GrantVideoMode. `backend` is `None` when the firmware has no graphics
    /// output, in which case the kernel gets no framebuffer.
    pub fn grant_video(
        self,
        backend: Option<&mut dyn VideoBackend>,
        config: &LoaderConfig,
    ) -> Loader<'r, Populating> {
        let record = self.record;
        let video = video::grant(record, backend, config);

        Loader {
            record,
            state: Populating { video },
        }
    }
}

impl<'r> Loader<'r, Populating> {
    /// The mode that was granted, if any.
    pub fn video(&self) -> Option<VideoMode> {
        self.state.video
    }

    /// Writes all remaining fields in one pass, then the loader magic.
    ///
    /// Nothing is written if a check fails, so the record still doesn't
    /// validate.
    pub fn seal(self, resources: &Resources, config: &LoaderConfig) -> Result<Sealed<'r>, LoaderError> {
        resources.check(config.identity_limit)?;

        let record = self.record;

        if let Some(map) = &resources.memory_map {
            record.memory_map_data = map.addr.as_u64();
            record.memory_map_size = map.count;
            record.memory_map_entsize = map.entry_size;
        }

        if let Some(elf) = &resources.elf {
            record.elf_symtab_hdr = elf.symtab_hdr.as_u64();
            record.elf_symtab_data = elf.symtab_data.as_u64();
            record.elf_strtab_hdr = elf.strtab_hdr.as_u64();
            record.elf_strtab_data = elf.strtab_data.as_u64();
        }

        if let Some(initrd) = &resources.initrd {
            record.initrd_base = initrd.base.as_u64();
            record.initrd_size = initrd.size;
        }

        record.rsdp = resources.rsdp.map_or(0, |a| a.as_u64());

        let written = cmdline::write(&mut record.cmdline, resources.cmdline);
        if written.truncated {
            log::warn!(
                "command line truncated to {} of {} bytes",
                written.len,
                resources.cmdline.len()
            );
        }

        // The loader magic is the last store; everything above must be in
        // memory before a reader can see it.
        compiler_fence(Ordering::SeqCst);
        // SAFETY: `record` is a live exclusive reference.
        unsafe { ptr::write_volatile(&mut record.header.loader_magic, LOADER_MAGIC_V1) };

        log::info!("boot record sealed at {:p}", record);
        Ok(Sealed { record })
    }

    /// Finalize: seal and transfer control. Only returns if sealing failed.
    ///
    /// # Safety
    ///
    /// See [`KernelEntry::enter`].
    pub unsafe fn finalize<E: KernelEntry>(
        self,
        resources: &Resources,
        config: &LoaderConfig,
        entry: E,
    ) -> Result<Infallible, LoaderError> {
        let sealed = self.seal(resources, config)?;
        // SAFETY: forwarded to the caller.
        unsafe { sealed.transfer(entry) }
    }
}

/// A finished record. Read-only from here on.
pub struct Sealed<'r> {
    record: &'r mut BootRecord,
}

impl<'r> Sealed<'r> {
    pub fn record(&self) -> &BootRecord {
        &*self.record
    }

    /// Hands the record to the kernel.
    ///
    /// # Safety
    ///
    /// See [`KernelEntry::enter`]. Firmware log sinks should be quiesced
    /// first.
    pub unsafe fn transfer<E: KernelEntry>(self, entry: E) -> ! {
        let record: *mut BootRecord = self.record;
        // SAFETY: forwarded to the caller.
        unsafe { entry.enter(record) }
    }
}
