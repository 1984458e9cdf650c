//! Loader side of the yboot hand-off.
//!
//! Firmware-specific code (UEFI, BIOS) gathers the machine state and drives a
//! [`Loader`] through its states:
//!
//! ```text
//! Unpopulated -> RequestOpen -> Populating -> Sealed -> (kernel)
//! ```
//!
//! Each transition consumes the previous state, so a sealed record can't be
//! written to again and a grant can't happen twice. The helpers in
//! [`image`], [`physmem`] and [`initrd`] turn a kernel ELF and the firmware
//! memory map into the values the record needs.

#![deny(unsafe_op_in_unsafe_fn)]
#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod handoff;
pub mod image;
pub mod initrd;
pub mod log;
pub mod physmem;
pub mod state;
pub mod video;

pub use config::{LoaderConfig, VideoDefaults};
pub use handoff::{EntryAddress, KernelEntry};
pub use image::{ImageError, KernelImage, RecordLocation};
pub use initrd::{place_initrd, InitrdError};
pub use state::{
    Loader, LoaderError, Populating, RequestOpen, Resources, Sealed, Unpopulated,
};
pub use video::{ModeInfo, VideoBackend, VideoError};
