//! Validate: the first thing the kernel does with the record.
//!
//! Nothing else in the record may be read before the magic check passed. A
//! mismatch means the two sides disagree on the record's shape, so there is
//! nothing to negotiate and no field is safe to look at.

use core::mem::align_of;
use core::ops::Deref;

use crate::record::{BootRecord, KERNEL_MAGIC_V1, LOADER_MAGIC_V1};

/// The record's magics are not the ones this build knows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("boot protocol mismatch: kernel magic {kernel_magic:#x}, loader magic {loader_magic:#x}")]
pub struct ProtocolMismatch {
    pub kernel_magic: u64,
    pub loader_magic: u64,
}

impl ProtocolMismatch {
    /// The kernel magic is the expected one, so the fault is on the loader's
    /// side.
    pub fn kernel_side_ok(&self) -> bool {
        self.kernel_magic == KERNEL_MAGIC_V1
    }

    /// The loader magic is the expected one, so the fault is on the kernel's
    /// side (or the record is not the one the kernel embedded).
    pub fn loader_side_ok(&self) -> bool {
        self.loader_magic == LOADER_MAGIC_V1
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidateError {
    #[error("boot record pointer is null")]
    Null,
    #[error("boot record at {0:#x} is not aligned to {align} bytes", align = align_of::<BootRecord>())]
    Misaligned(usize),
    #[error(transparent)]
    ProtocolMismatch(#[from] ProtocolMismatch),
}

/// A record whose magics have been checked.
///
/// This is the only way to get at the hand-off data on the kernel side; see
/// [`ValidatedRecord::consume`].
#[derive(Clone, Copy, Debug)]
pub struct ValidatedRecord<'a> {
    record: &'a BootRecord,
}

impl<'a> ValidatedRecord<'a> {
    pub fn record(&self) -> &'a BootRecord {
        self.record
    }
}

impl Deref for ValidatedRecord<'_> {
    type Target = BootRecord;

    fn deref(&self) -> &BootRecord {
        self.record
    }
}

impl BootRecord {
    /// Checks both magics against the protocol constants. Pure.
    pub fn validate(&self) -> Result<ValidatedRecord<'_>, ProtocolMismatch> {
        let kernel_magic = self.header.kernel_magic;
        let loader_magic = self.header.loader_magic;

        if kernel_magic != KERNEL_MAGIC_V1 || loader_magic != LOADER_MAGIC_V1 {
            return Err(ProtocolMismatch {
                kernel_magic,
                loader_magic,
            });
        }

        Ok(ValidatedRecord { record: self })
    }
}

/// Validates the record behind a raw address handed over at kernel entry.
///
/// # Safety
///
/// If `ptr` is non-null and aligned it must point to at least
/// `size_of::<BootRecord>()` readable bytes that stay valid and unmodified for
/// `'a`.
pub unsafe fn validate<'a>(ptr: *const BootRecord) -> Result<ValidatedRecord<'a>, ValidateError> {
    if ptr.is_null() {
        return Err(ValidateError::Null);
    }

    let addr = ptr as usize;
    if addr % align_of::<BootRecord>() != 0 {
        return Err(ValidateError::Misaligned(addr));
    }

    // SAFETY: non-null and aligned was checked above; the caller guarantees
    // the memory is a readable record for 'a.
    let record: &'a BootRecord = unsafe { &*ptr };
    Ok(record.validate()?)
}
