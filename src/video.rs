//! Video mode negotiation.
//!
//! The record reuses the same three cells for the kernel's request and the
//! loader's grant, with no flag saying which one is in there. This module
//! gives the two phases distinct types: a [`VideoRequest`] can only be read
//! while the request phase is open, and a [`VideoMode`] only exists once the
//! loader granted one with a real framebuffer.

use num_traits::FromPrimitive;

use crate::record::BootRecord;

/// Pixel layouts the protocol knows about. Both are 4 bytes per pixel.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    PartialEq,
    num_derive::FromPrimitive,
)]
#[repr(u32)]
pub enum PixelFormat {
    /// Packed 32-bit, red in the lowest byte.
    Rgb32 = 0,
    /// Packed 32-bit, blue in the lowest byte.
    Bgr32 = 1,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: u64 = 4;

    /// Decodes the raw `video_format` cell. Unknown values yield `None`.
    pub fn from_raw(raw: u32) -> Option<PixelFormat> {
        PixelFormat::from_u32(raw)
    }

    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Phase 1: what the kernel asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoRequest {
    pub width: u32,
    pub height: u32,
    /// `None` if the kernel wrote a value outside [`PixelFormat`]. The loader
    /// replaces such a request instead of failing.
    pub format: Option<PixelFormat>,
    /// The cell as written, kept for diagnostics.
    pub raw_format: u32,
}

impl VideoRequest {
    /// True if the kernel left the request cells at zero.
    pub fn is_unspecified(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Phase 2: the mode the loader actually configured.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Physical address of the linear framebuffer. Never zero.
    pub framebuffer: u64,
    /// Bytes per scanline, at least `width * 4`.
    pub pitch: u64,
}

impl VideoMode {
    /// Total size of the visible framebuffer in bytes.
    pub fn byte_len(&self) -> u64 {
        self.pitch * self.height as u64
    }
}

/// A video field group read together with the phase the reader is in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VideoPhase {
    Requested(VideoRequest),
    /// `None` means the loader could not set any mode.
    Granted(Option<VideoMode>),
}

impl BootRecord {
    /// Writes the kernel's mode request. Only meaningful before the loader
    /// picks the record up.
    pub fn request_video_mode(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.request_video_mode_raw(width, height, format.as_raw());
    }

    /// Like [`Self::request_video_mode`] but with an unchecked format value.
    pub fn request_video_mode_raw(&mut self, width: u32, height: u32, format: u32) {
        self.video_width = width;
        self.video_height = height;
        self.video_format = format;
    }

    /// `const` form of [`Self::request_video_mode`] for the embedded template.
    pub const fn with_video_request(mut self, width: u32, height: u32, format: PixelFormat) -> Self {
        self.video_width = width;
        self.video_height = height;
        self.video_format = format as u32;
        self
    }

    /// Reads the cells as the kernel's request.
    ///
    /// Only meaningful before the loader grants a mode; the loader calls this
    /// while its request phase is open.
    pub fn video_request(&self) -> VideoRequest {
        VideoRequest {
            width: self.video_width,
            height: self.video_height,
            format: PixelFormat::from_raw(self.video_format),
            raw_format: self.video_format,
        }
    }

    /// Reads the cells as a grant. Callers must be past the grant.
    pub(crate) fn read_video_grant(&self) -> Option<VideoMode> {
        if self.video_framebuffer == 0 {
            return None;
        }

        let Some(format) = PixelFormat::from_raw(self.video_format) else {
            log::warn!(
                "granted video mode has unknown format {}; ignoring framebuffer",
                self.video_format
            );
            return None;
        };

        Some(VideoMode {
            width: self.video_width,
            height: self.video_height,
            format,
            framebuffer: self.video_framebuffer,
            pitch: self.video_pitch,
        })
    }

    /// Reads the video cells as the given phase.
    ///
    /// The record itself cannot tell the phases apart; this is for tools that
    /// know from context which one applies.
    pub fn video_phase(&self, granted: bool) -> VideoPhase {
        if granted {
            VideoPhase::Granted(self.read_video_grant())
        } else {
            VideoPhase::Requested(self.video_request())
        }
    }
}
