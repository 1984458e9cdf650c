//! The yboot hand-off record
//!
//! This crate is shared by the loader and the kernel. It defines the one
//! structure that crosses the boundary between them, [`BootRecord`], and the
//! only legitimate ways to touch it: the kernel fills in a video request before
//! it is loaded, the loader (see the `yboot-loader` crate) populates the rest,
//! and after control transfer the kernel validates the record and consumes it
//! into a typed [`BootInfo`].
//!
//! Everything here is host-testable; unit tests build synthetic records
//! instead of relying on a real boot environment.
//!
#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

pub mod cmdline;
pub mod entry;
pub mod info;
pub mod record;
pub mod validate;
pub mod video;

pub use cmdline::{CommandLine, CommandLineError};
pub use info::{BootInfo, ElfTables, Initrd, MemoryMap};
pub use record::{BootRecord, RecordHeader, CMDLINE_SIZE, KERNEL_MAGIC_V1, LOADER_MAGIC_V1};
pub use validate::{validate, ProtocolMismatch, ValidateError, ValidatedRecord};
pub use video::{PixelFormat, VideoMode, VideoPhase, VideoRequest};
