//! Loader settings.

use log::LevelFilter;
use yboot::PixelFormat;

/// The loader's guaranteed identity mapping covers this much low memory.
pub const DEFAULT_IDENTITY_LIMIT: u64 = 1 << 30;

/// Mode used when the kernel requests none, or when its request can't be
/// met and `fallback` is set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoDefaults {
    pub width: u32,
    pub height: u32,
    /// Also replaces a request with an unknown format.
    pub format: PixelFormat,
    /// Try the default mode if the requested one isn't available.
    pub fallback: bool,
}

impl Default for VideoDefaults {
    fn default() -> Self {
        VideoDefaults {
            width: 1024,
            height: 768,
            format: PixelFormat::Rgb32,
            fallback: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoaderConfig {
    pub video: VideoDefaults,
    /// Exclusive upper bound for every address written to the record.
    pub identity_limit: u64,
    pub log_level: LevelFilter,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            video: VideoDefaults::default(),
            identity_limit: DEFAULT_IDENTITY_LIMIT,
            log_level: LevelFilter::Info,
        }
    }
}
