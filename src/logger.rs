//! Kernel-style structured logging.
//!
//! Mirrors the host kernel's leveled logger: a global max level, a ring
//! buffer of recent lines, and an optional output sink. The pager core
//! never touches a terminal directly; it goes through `kinfo!`/`kwarn!`/
//! `kerror!`/`kdebug!`, which land here.

extern crate alloc;

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

const RINGBUF_SIZE: usize = 16384;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info.priority());
static RINGBUF: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());
static SINK: Mutex<Option<&'static dyn LogSink>> = Mutex::new(None);

/// A destination for formatted log lines. Tests install a capturing sink;
/// a real kernel build would install one backed by a serial port.
pub trait LogSink: Sync {
    fn write(&self, line: &str);
}

pub fn set_sink(sink: &'static dyn LogSink) {
    *SINK.lock() = Some(sink);
}

pub fn clear_sink() {
    *SINK.lock() = None;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }
}

pub fn set_max_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Fatal,
        1 => LogLevel::Error,
        2 => LogLevel::Warn,
        3 => LogLevel::Info,
        4 => LogLevel::Debug,
        _ => LogLevel::Trace,
    }
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level.priority() > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let mut line = LineBuf::new();
    let _ = write!(line, "[{:<5}] ", level.as_str());
    let _ = fmt::write(&mut line, args);
    let _ = line.write_char('\n');

    RINGBUF.lock().write_bytes(line.as_bytes());

    if let Some(sink) = *SINK.lock() {
        sink.write(line.as_str());
    }
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{ $crate::klog!($crate::logger::LogLevel::Fatal, $($arg)*); }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{ $crate::klog!($crate::logger::LogLevel::Error, $($arg)*); }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{ $crate::klog!($crate::logger::LogLevel::Warn, $($arg)*); }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{ $crate::klog!($crate::logger::LogLevel::Info, $($arg)*); }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{ $crate::klog!($crate::logger::LogLevel::Debug, $($arg)*); }};
}

/// Fixed-size, stack-resident formatting buffer. The pager logs from
/// contexts that must not allocate (holding the metadata mutex), so this
/// avoids `alloc::format!`.
struct LineBuf {
    buf: [u8; 256],
    len: usize,
}

impl LineBuf {
    fn new() -> Self {
        Self { buf: [0; 256], len: 0 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(self.as_bytes()).unwrap_or("")
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let room = self.buf.len() - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

struct RingBuffer {
    buf: [u8; RINGBUF_SIZE],
    write_pos: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self { buf: [0; RINGBUF_SIZE], write_pos: 0 }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.buf[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % RINGBUF_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    struct CaptureSink {
        lines: StdMutex<Vec<std::string::String>>,
    }

    impl LogSink for CaptureSink {
        fn write(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn level_filter_drops_below_threshold() {
        set_max_level(LogLevel::Warn);
        assert!(LogLevel::Error.priority() <= LOG_LEVEL.load(Ordering::Relaxed));
        assert!(LogLevel::Debug.priority() > LOG_LEVEL.load(Ordering::Relaxed));
        set_max_level(LogLevel::Trace);
    }

    #[test]
    fn line_buf_truncates_rather_than_panics() {
        let mut line = LineBuf::new();
        let huge = "x".repeat(1000);
        let _ = line.write_str(&huge);
        assert_eq!(line.len, 256);
    }
}
