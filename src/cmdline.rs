//! The command line buffer.
//!
//! A fixed `CMDLINE_SIZE` byte array holding NUL-terminated text. The loader
//! owns truncation: [`write`] cuts over-long input at a character boundary so
//! the terminator always fits. The kernel reads it through [`CommandLine`].

use core::ffi::CStr;

use crate::record::CMDLINE_SIZE;

/// Longest text that fits together with its terminator.
pub const CMDLINE_MAX_LEN: usize = CMDLINE_SIZE - 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CommandLineError {
    #[error("command line has no NUL terminator")]
    Unterminated,
    #[error("command line is not valid UTF-8")]
    NotUtf8,
}

/// Result of a loader-side [`write`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Written {
    /// Bytes stored, not counting the terminator.
    pub len: usize,
    /// Whether the input was cut short.
    pub truncated: bool,
}

/// Stores `text` in `buf`, truncating to [`CMDLINE_MAX_LEN`] bytes on a UTF-8
/// character boundary and zero-filling everything after it.
pub fn write(buf: &mut [u8; CMDLINE_SIZE], text: &str) -> Written {
    let mut len = text.len().min(CMDLINE_MAX_LEN);
    while !text.is_char_boundary(len) {
        len -= 1;
    }

    // An embedded NUL would end the string early for the reader; cut there
    // instead so `len` is what the kernel sees.
    let len = text.as_bytes()[..len]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(len);

    buf[..len].copy_from_slice(&text.as_bytes()[..len]);
    buf[len..].fill(0);

    Written {
        len,
        truncated: len < text.len(),
    }
}

/// Kernel view of the command line buffer.
#[derive(Clone, Copy, Debug)]
pub struct CommandLine<'a> {
    buf: &'a [u8; CMDLINE_SIZE],
}

impl<'a> CommandLine<'a> {
    pub fn new(buf: &'a [u8; CMDLINE_SIZE]) -> Self {
        CommandLine { buf }
    }

    /// The bytes before the terminator.
    pub fn as_bytes(&self) -> Result<&'a [u8], CommandLineError> {
        CStr::from_bytes_until_nul(self.buf)
            .map(CStr::to_bytes)
            .map_err(|_| CommandLineError::Unterminated)
    }

    pub fn as_str(&self) -> Result<&'a str, CommandLineError> {
        core::str::from_utf8(self.as_bytes()?).map_err(|_| CommandLineError::NotUtf8)
    }

    pub fn is_empty(&self) -> bool {
        self.buf[0] == 0
    }

    /// Whitespace-separated arguments. A malformed buffer has none.
    pub fn args(&self) -> impl Iterator<Item = &'a str> {
        self.as_str().unwrap_or("").split_ascii_whitespace()
    }

    /// Value of the first `key=value` argument, or `Some("")` for a bare
    /// `key`.
    pub fn value(&self, key: &str) -> Option<&'a str> {
        self.args().find_map(|arg| match arg.split_once('=') {
            Some((k, v)) if k == key => Some(v),
            None if arg == key => Some(""),
            _ => None,
        })
    }
}
