//! Command line value formats.

use std::str::FromStr;

use yboot::PixelFormat;

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn hex(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(&digits.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("bad number {s:?}: {e}"))
}

fn field<T: FromStr>(s: &str, what: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("bad {what} {s:?}"))
}

fn pixel_format(s: &str) -> Result<PixelFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "rgb32" | "rgb" | "0" => Ok(PixelFormat::Rgb32),
        "bgr32" | "bgr" | "1" => Ok(PixelFormat::Bgr32),
        _ => Err(format!("unknown pixel format {s:?}; expected rgb32 or bgr32")),
    }
}

/// `WIDTHxHEIGHT[:FORMAT]`, format defaulting to RGB32.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModeSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FromStr for ModeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let (size, format) = match s.split_once(':') {
            Some((size, format)) => (size, pixel_format(format)?),
            None => (s, PixelFormat::Rgb32),
        };
        let (width, height) = size
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, found {size:?}"))?;

        Ok(ModeSpec {
            width: field(width, "width")?,
            height: field(height, "height")?,
            format,
        })
    }
}

/// `ADDR:COUNT:STRIDE` for the memory map.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MmapSpec {
    pub addr: u64,
    pub count: u32,
    pub stride: u32,
}

impl FromStr for MmapSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let mut parts = s.split(':');
        let (Some(addr), Some(count), Some(stride), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected ADDR:COUNT:STRIDE, found {s:?}"));
        };

        Ok(MmapSpec {
            addr: hex(addr)?,
            count: field(count, "entry count")?,
            stride: field(stride, "stride")?,
        })
    }
}

/// `ADDR:SIZE` for the initrd.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InitrdSpec {
    pub addr: u64,
    pub size: u64,
}

impl FromStr for InitrdSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let (addr, size) = s
            .split_once(':')
            .ok_or_else(|| format!("expected ADDR:SIZE, found {s:?}"))?;
        Ok(InitrdSpec {
            addr: hex(addr)?,
            size: hex(size)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn numbers() {
        assert_eq!(hex("4096"), Ok(4096));
        assert_eq!(hex("0x1000"), Ok(0x1000));
        assert_eq!(hex("0xFD00_0000"), Ok(0xFD00_0000));
        assert!(hex("0xZZ").is_err());
        assert!(hex("").is_err());
    }

    #[test]
    fn modes() {
        assert_eq!(
            "800x600:bgr32".parse(),
            Ok(ModeSpec {
                width: 800,
                height: 600,
                format: PixelFormat::Bgr32
            })
        );
        assert_eq!(
            "1024x768".parse(),
            Ok(ModeSpec {
                width: 1024,
                height: 768,
                format: PixelFormat::Rgb32
            })
        );
        assert!("1024".parse::<ModeSpec>().is_err());
        assert!("1024x768:yuv".parse::<ModeSpec>().is_err());
    }

    #[test]
    fn memory_maps() {
        assert_eq!(
            "0x9000:3:48".parse(),
            Ok(MmapSpec {
                addr: 0x9000,
                count: 3,
                stride: 48
            })
        );
        assert!("0x9000:3".parse::<MmapSpec>().is_err());
        assert!("0x9000:3:48:1".parse::<MmapSpec>().is_err());
    }

    #[test]
    fn initrds() {
        assert_eq!(
            "0x400000:0x1000".parse(),
            Ok(InitrdSpec {
                addr: 0x40_0000,
                size: 0x1000
            })
        );
        assert!("0x400000".parse::<InitrdSpec>().is_err());
    }
}
