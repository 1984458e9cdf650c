//! GrantVideoMode: turning the kernel's request into a configured mode.
//!
//! The firmware side is abstracted as a [`VideoBackend`], shaped after UEFI's
//! graphics output protocol: a numbered list of modes to query, and a call to
//! switch to one of them.

use yboot::{BootRecord, PixelFormat, VideoMode, VideoRequest};

use crate::config::LoaderConfig;

/// One mode the firmware offers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModeInfo {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// `None` for layouts the protocol can't describe (bitmask, BLT-only).
    pub format: Option<PixelFormat>,
    pub pixels_per_scanline: u32,
}

impl ModeInfo {
    fn pitch(&self) -> u64 {
        self.pixels_per_scanline as u64 * PixelFormat::BYTES_PER_PIXEL
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VideoError {
    #[error("firmware refused to set mode {0}")]
    ModeRefused(u32),
    #[error("no mode with index {0}")]
    NoSuchMode(u32),
}

pub trait VideoBackend {
    fn mode_count(&self) -> u32;

    /// `None` if the firmware can't describe mode `index`.
    fn mode(&self, index: u32) -> Option<ModeInfo>;

    /// Switches to mode `index` and returns the framebuffer's physical
    /// address.
    fn set_mode(&mut self, index: u32) -> Result<u64, VideoError>;
}

/// Every mode the backend can describe.
pub fn modes(backend: &dyn VideoBackend) -> impl Iterator<Item = ModeInfo> + '_ {
    (0..backend.mode_count()).filter_map(move |i| backend.mode(i))
}

/// What the loader will look for, after defaults and replacements.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Target {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Target {
    /// Resolves a kernel request against the configured defaults.
    pub fn resolve(request: &VideoRequest, config: &LoaderConfig) -> Target {
        let format = match request.format {
            Some(format) => format,
            None => {
                log::warn!(
                    "kernel requested unknown pixel format {}; using {:?}",
                    request.raw_format,
                    config.video.format
                );
                config.video.format
            }
        };

        if request.is_unspecified() {
            log::info!(
                "no video mode requested; using {}x{}",
                config.video.width,
                config.video.height
            );
            Target {
                width: config.video.width,
                height: config.video.height,
                format,
            }
        } else {
            Target {
                width: request.width,
                height: request.height,
                format,
            }
        }
    }

    fn fallback(config: &LoaderConfig) -> Target {
        Target {
            width: config.video.width,
            height: config.video.height,
            format: config.video.format,
        }
    }

    fn matches(&self, mode: &ModeInfo) -> bool {
        mode.width == self.width && mode.height == self.height && mode.format == Some(self.format)
    }
}

/// Finds the backend mode to use for `target`. Exact matches only; the
/// configured default is tried next if fallback is enabled.
pub fn select_mode(
    backend: &dyn VideoBackend,
    target: &Target,
    config: &LoaderConfig,
) -> Option<ModeInfo> {
    let find = |target: &Target| {
        modes(backend).find(|mode| {
            if !target.matches(mode) {
                return false;
            }
            if mode.pixels_per_scanline < mode.width {
                log::warn!("skipping mode {} with short scanlines", mode.index);
                return false;
            }
            true
        })
    };

    if let Some(mode) = find(target) {
        return Some(mode);
    }

    let fallback = Target::fallback(config);
    if config.video.fallback && fallback != *target {
        log::warn!(
            "no {}x{} {:?} mode; falling back to {}x{} {:?}",
            target.width,
            target.height,
            target.format,
            fallback.width,
            fallback.height,
            fallback.format
        );
        return find(&fallback);
    }

    None
}

/// Overwrites the video cells with the outcome of the negotiation.
///
/// On success the cells describe the configured mode. Otherwise the
/// framebuffer and pitch are zero and width, height and format keep the
/// resolved request; the kernel gates on the framebuffer only.
pub(crate) fn grant(
    record: &mut BootRecord,
    backend: Option<&mut dyn VideoBackend>,
    config: &LoaderConfig,
) -> Option<VideoMode> {
    let target = Target::resolve(&record.video_request(), config);

    let granted = backend.and_then(|backend| {
        let mode = select_mode(backend, &target, config)?;
        let format = mode.format?;
        match backend.set_mode(mode.index) {
            Ok(0) => {
                log::warn!("mode {} has no linear framebuffer", mode.index);
                None
            }
            Ok(framebuffer) => Some(VideoMode {
                width: mode.width,
                height: mode.height,
                format,
                framebuffer,
                pitch: mode.pitch(),
            }),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    });

    match granted {
        Some(mode) => {
            log::info!(
                "video mode {}x{} {:?}, framebuffer at {:#x}",
                mode.width,
                mode.height,
                mode.format,
                mode.framebuffer
            );
            record.video_width = mode.width;
            record.video_height = mode.height;
            record.video_format = mode.format.as_raw();
            record.video_framebuffer = mode.framebuffer;
            record.video_pitch = mode.pitch;
        }
        None => {
            log::warn!("no video mode set; kernel gets no framebuffer");
            record.video_width = target.width;
            record.video_height = target.height;
            record.video_format = target.format.as_raw();
            record.video_framebuffer = 0;
            record.video_pitch = 0;
        }
    }

    granted
}
