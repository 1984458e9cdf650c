//! Choosing where the initial ramdisk goes.
//!
//! The preferred spot is directly below the kernel, so the two stay
//! together in low memory. Failing that, the lowest free range above the
//! kernel is used, leaving a guard gap after the kernel's last page.

use yboot::Initrd;

use crate::config::LoaderConfig;
use crate::physmem::{reserve, Address, Extent, Length, Map, MemoryType, PAGE_SIZE};

/// Space left free after the kernel image when placing above it.
pub const KERNEL_GUARD_GAP: u64 = 0x3000;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InitrdError {
    #[error("no room for a {size:#x} byte initrd below {limit:#x}")]
    NoSpace { size: u64, limit: u64 },
    #[error("initrd of {0:#x} bytes does not fit in the address space")]
    TooLarge(u64),
}

/// Picks a page-aligned home for a `size` byte initrd.
///
/// `kernel` is the physical span of the loaded kernel. Returns `Ok(None)` for
/// an empty initrd, which the record reports as absent. The result never
/// overlaps the kernel and lies below `config.identity_limit`.
pub fn place_initrd(
    map: &Map,
    kernel: Extent,
    size: u64,
    config: &LoaderConfig,
) -> Result<Option<Extent>, InitrdError> {
    if size == 0 {
        return Ok(None);
    }

    let length = Length::from_raw(size)
        .align_up(PAGE_SIZE)
        .ok_or(InitrdError::TooLarge(size))?;
    let limit = Address::from_raw(config.identity_limit);
    let fits = |extent: &Extent| extent.end_address() <= limit && map.is_available(extent);

    // Directly below the kernel. Address zero is off limits; the record
    // would read it as "absent".
    if let Some(start) = kernel.address().as_raw().checked_sub(length.as_raw()) {
        let start = Address::from_raw(start).align_down(PAGE_SIZE);
        if start.as_raw() != 0 {
            if let Some(below) = Extent::new(start, length).filter(&fits) {
                log::debug!("initrd goes below the kernel at {:#x}", start.as_raw());
                return Ok(Some(below));
            }
        }
    }

    // Lowest fit above the kernel and its guard gap.
    let floor = kernel
        .end_address()
        .checked_offset(Length::from_raw(KERNEL_GUARD_GAP))
        .and_then(|a| a.align_up(PAGE_SIZE));
    let above = floor.and_then(|floor| {
        reserve(map.iter_type(MemoryType::Available), [kernel])
            .filter_map(|free| free.shrink_to_alignment(PAGE_SIZE))
            .filter_map(|free| {
                let start = free.address().max(floor);
                Extent::new(start, length).filter(|e| free.contains(e))
            })
            .find(|e| e.end_address() <= limit)
    });

    match above {
        Some(extent) => {
            log::debug!(
                "initrd goes above the kernel at {:#x}",
                extent.address().as_raw()
            );
            Ok(Some(extent))
        }
        None => Err(InitrdError::NoSpace {
            size,
            limit: config.identity_limit,
        }),
    }
}

/// The record's view of a placed initrd. Its size is the image size, not the
/// page-rounded span.
pub fn describe(extent: Extent, size: u64) -> Option<Initrd> {
    let base = x86_64::PhysAddr::try_new(extent.address().as_raw()).ok()?;
    Some(Initrd { base, size })
}
