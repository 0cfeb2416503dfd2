//! Bus memory emulator core, for microcontrollers acting as an I2C memory
//! device while exposing a textual command channel to a host.
//!
//! The device looks like a 4KB memory to an I2C controller: a transaction
//! starts with a 16-bit little-endian register address, optionally followed by
//! data to be stored at that address.  A read following an address-only write
//! returns the memory contents from that address onwards.
//!
//! In parallel, a host (typically over a USB virtual serial port) sends one
//! line commands and receives framed replies, plus any diagnostic stream the
//! firmware pushes while no command is being handled.
//!
//! `no_std`.  Requires `alloc` for async traits, typically only used by the
//! host link pump.
//!
//! ## Architecture
//!
//! Two independent halves:
//!
//! - **Command channel** ([`cmd`]): a byte-at-a-time state machine, fed by the
//!   host link.  Every byte is echoed.  Once a full line has been received,
//!   the command is dispatched and its reply sent as an acknowledgement line,
//!   zero or more payload chunks, and a terminating empty line.
//! - **I2C target** ([`i2c`]): an engine whose handlers run in interrupt
//!   context, reading and writing the shared memory directly.  Each handler
//!   posts a compact [`i2c::EventWord`] to a bounded mailbox, drained by a
//!   worker outside interrupt context purely for diagnostics.
//!
//! Neither half owns global state.  Each is an explicitly constructed object,
//! borrowed by whichever context drives it, so multiple instances can coexist
//! and both are testable on the host.
//!
//! ## Command protocol
//!
//! Lines are `<COMMAND><SEP><ARGS>\n`, where `COMMAND` is a single letter,
//! `SEP` an optional run of spaces or colons and `ARGS` up to 63 alphanumeric
//! characters.  Replies start with `<lowercase command> 0\n` on success or
//! `E <code>\n` on failure, where `code` is a POSIX error number (see
//! [`Error::code()`]).
//!
//! | Command | Meaning                                   |
//! |---------|-------------------------------------------|
//! | `@`     | Report last error (used for resync)       |
//! | `H`     | Help                                      |
//! | `I`     | Identify firmware build                   |
//!
//! A malformed line is drained until its newline and answered with the error
//! that was detected, so the host can always resynchronise by sending `\n`.
//!
//! ## Getting Started
//!
//! **Command channel**:
//! 1. Implement [`io::Transport`] for the host link's write side
//! 2. Create a [`cmd::TxPort`], typically as a `static`, so other subsystems
//!    can call [`cmd::TxPort::stream_msg()`]
//!    (use [`cmd::TxPort::with_lock()`] with a blocking mutex if they run at
//!    different priorities)
//! 3. Create a [`cmd::CommandMachine`] borrowing the port, and feed it the
//!    bytes read from the host, or let [`cmd::LinkPump`] do so
//!
//! **I2C target**:
//! 1. Create an [`i2c::Mailbox`] and split it
//! 2. Create an [`i2c::I2cEngine`] with the producer, and call its `on_*`
//!    handlers from the I2C peripheral interrupts
//! 3. Create an [`i2c::Worker`] with the consumer, [`i2c::Worker::start()`] it
//!    with an [`io::SlaveBus`] implementation, then poll it from a thread or
//!    task
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host link pump and I2C worker loop (requires
//!   `alloc`).

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
extern crate alloc;

pub mod cmd;
pub mod config;
pub mod i2c;
pub mod io;

/// Busmem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Argument does not fit in the command frame
    TooLarge,
    /// Invalid character in command argument
    InvalidChar,
    /// Unknown command
    NotImplemented,
    /// Host link I/O error
    Io,
    /// Handler completes later.  Reserved, no built-in command uses it.
    Deferred(u8),
}

impl Error {
    /// POSIX error code reported to the host in `E <code>` lines.
    ///
    /// Failures are negative, deferred completion is positive.
    pub const fn code(self) -> i32 {
        match self {
            Error::TooLarge => -7,
            Error::InvalidChar => -22,
            Error::NotImplemented => -38,
            Error::Io => -5,
            Error::Deferred(code) => code as i32,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::TooLarge => write!(f, "argument too large"),
            Error::InvalidChar => write!(f, "invalid character"),
            Error::NotImplemented => write!(f, "not implemented"),
            Error::Io => write!(f, "I/O error"),
            Error::Deferred(code) => write!(f, "deferred ({code})"),
        }
    }
}

/// Type to represent the result of a busmem operation
pub type Result<T> = core::result::Result<T, Error>;
