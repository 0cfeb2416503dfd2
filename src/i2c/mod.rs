//! I2C target emulating a memory device, plus the diagnostics relay out of
//! interrupt context.
//!
//! The [`I2cEngine`] handlers are called by the I2C peripheral driver from its
//! interrupt.  They access the shared memory directly and never block: the
//! only thing they do besides touching memory is a non-blocking post of an
//! [`EventWord`] to the [`Mailbox`].
//!
//! The [`Worker`] drains the mailbox from a thread or task and logs each
//! event.  It owns no engine state, so if it falls behind and events are
//! lost, only diagnostics suffer.
//!
//! ## Wire protocol
//!
//! Each transaction starts with a 16-bit little-endian register address,
//! masked into the [`MEM_SIZE`](crate::config::MEM_SIZE) memory.  Bytes
//! following the address are stored from that address onwards, clipped at
//! the end of memory (never wrapped).  A read after an address-only write
//! returns the memory from the address to the end of memory.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

pub use sync::{I2cEngine, Worker};

use heapless::spsc::{Consumer, Producer, Queue};

use crate::config::MAILBOX_SLOTS;

/// Queue length backing the mailbox.  One entry is always kept free.
pub const MAILBOX_DEPTH: usize = MAILBOX_SLOTS + 1;

/// Bounded queue moving events from interrupt context to the worker.
///
/// ```rust,ignore
/// static mut MAILBOX: Mailbox = Mailbox::new();
/// let (poster, fetcher) = unsafe { (*core::ptr::addr_of_mut!(MAILBOX)).split() };
/// ```
pub type Mailbox = Queue<EventWord, MAILBOX_DEPTH>;

/// Mailbox end owned by the engine, in interrupt context
pub type Poster<'q> = Producer<'q, EventWord, MAILBOX_DEPTH>;

/// Mailbox end owned by the worker
pub type Fetcher<'q> = Consumer<'q, EventWord, MAILBOX_DEPTH>;

/// Where an operation is called from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Interrupt handler: must not block
    Interrupt,
    /// Thread or task: may wait
    Thread,
}

const TYPE_SHIFT: u32 = 28;
const TYPE_MASK: u32 = 0x7;
const COUNT_SHIFT: u32 = 16;
const COUNT_MASK: u32 = 0xFFF;
const ADDR_MASK: u32 = 0xFFFF;
const ERROR_MASK: u32 = 0xFF;

const TYPE_ERROR: u32 = 1;
const TYPE_INIT: u32 = 2;
const TYPE_WRITE: u32 = 3;
const TYPE_READ: u32 = 4;

/// Packed 32-bit event, cheap to pass through the mailbox.
///
/// | Bits   | Field                          |
/// |--------|--------------------------------|
/// | 28..30 | type: error, init, write, read |
/// | 16..27 | byte count                     |
/// | 0..15  | address                        |
/// | 0..7   | error code (error type only)   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWord(pub u32);

impl EventWord {
    /// Raw type field
    pub const fn kind(self) -> u8 {
        ((self.0 >> TYPE_SHIFT) & TYPE_MASK) as u8
    }

    /// Decode the word, `None` if the type is unknown.
    pub const fn decode(self) -> Option<Event> {
        let w = self.0;
        let addr = (w & ADDR_MASK) as u16;
        let count = ((w >> COUNT_SHIFT) & COUNT_MASK) as u16;
        match self.kind() as u32 {
            TYPE_ERROR => Some(Event::Error((w & ERROR_MASK) as u8)),
            TYPE_INIT => Some(Event::Init),
            TYPE_WRITE => Some(Event::Write { addr, count }),
            TYPE_READ => Some(Event::Read { addr, count }),
            _ => None,
        }
    }
}

/// What happened on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Bus error, carrying the [`BusError`] code
    Error(u8),
    /// Power cycle equivalent
    Init,
    /// Controller stored `count` bytes from `addr`
    Write { addr: u16, count: u16 },
    /// Controller set the address to read from, having sent `count` bytes
    Read { addr: u16, count: u16 },
}

impl Event {
    pub const fn encode(self) -> EventWord {
        let word = match self {
            Event::Error(code) => (TYPE_ERROR << TYPE_SHIFT) | (code as u32 & ERROR_MASK),
            Event::Init => TYPE_INIT << TYPE_SHIFT,
            Event::Write { addr, count } => Self::access(TYPE_WRITE, addr, count),
            Event::Read { addr, count } => Self::access(TYPE_READ, addr, count),
        };
        EventWord(word)
    }

    const fn access(kind: u32, addr: u16, count: u16) -> u32 {
        (kind << TYPE_SHIFT)
            | ((count as u32 & COUNT_MASK) << COUNT_SHIFT)
            | (addr as u32 & ADDR_MASK)
    }
}

/// The diagnostic line logged by the worker
impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match *self {
            Event::Error(code) => {
                let name = BusError::from_code(code).map_or("invalid", BusError::name);
                write!(f, "I2C error: {code} {name}")
            }
            Event::Init => write!(f, "I2C Power cycle"),
            Event::Write { addr, count } => access_line(f, ">Wr", addr, count),
            Event::Read { addr, count } => access_line(f, "<Rd", addr, count),
        }
    }
}

fn access_line(
    f: &mut core::fmt::Formatter<'_>,
    dir: &str,
    start: u16,
    count: u16,
) -> core::fmt::Result {
    if count > 1 {
        let end = u32::from(start) + u32::from(count) - 1;
        write!(f, "I2C {dir}> [{start:02X}..{end:02X}]")
    } else {
        write!(f, "I2C {dir} [{start:02X}]")
    }
}

/// I2C target errors, as a small integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    Unknown,
    Bus,
    ArbitrationLost,
    AckFailure,
    Overrun,
    Pec,
    Timeout,
    SmbusAlert,
}

impl BusError {
    /// Normalize a driver error flag set.  The lowest set flag wins:
    ///
    /// | Flag | Error            |
    /// |------|------------------|
    /// | 0x01 | bus error        |
    /// | 0x02 | arbitration lost |
    /// | 0x04 | ack failure      |
    /// | 0x08 | overrun          |
    /// | 0x10 | PEC error        |
    /// | 0x20 | timeout          |
    /// | 0x40 | SMBus alert      |
    pub const fn from_flags(flags: u8) -> Self {
        match flags.trailing_zeros() {
            0 => BusError::Bus,
            1 => BusError::ArbitrationLost,
            2 => BusError::AckFailure,
            3 => BusError::Overrun,
            4 => BusError::Pec,
            5 => BusError::Timeout,
            6 => BusError::SmbusAlert,
            _ => BusError::Unknown,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            BusError::Unknown => 0,
            BusError::Bus => 1,
            BusError::ArbitrationLost => 2,
            BusError::AckFailure => 3,
            BusError::Overrun => 4,
            BusError::Pec => 5,
            BusError::Timeout => 6,
            BusError::SmbusAlert => 7,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BusError::Unknown),
            1 => Some(BusError::Bus),
            2 => Some(BusError::ArbitrationLost),
            3 => Some(BusError::AckFailure),
            4 => Some(BusError::Overrun),
            5 => Some(BusError::Pec),
            6 => Some(BusError::Timeout),
            7 => Some(BusError::SmbusAlert),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BusError::Unknown => "unknown",
            BusError::Bus => "bus error",
            BusError::ArbitrationLost => "arbitration lost",
            BusError::AckFailure => "ack failure",
            BusError::Overrun => "overrun",
            BusError::Pec => "pec error",
            BusError::Timeout => "timeout",
            BusError::SmbusAlert => "smbus alert",
        }
    }
}
