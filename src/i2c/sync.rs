//! I2C transaction engine (interrupt context) and diagnostic worker.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{I2cConfig, INBOX_SIZE, MEM_SIZE};
use crate::i2c::{BusError, Context, Event, EventWord, Fetcher, Poster};
use crate::io::SlaveBus;

/// Size of the register address leading every transaction
const ADDR_SIZE: usize = core::mem::size_of::<u16>();

/// Mask bringing any register address into the memory
const ADDR_MASK: u16 = (MEM_SIZE - 1) as u16;

/// The memory device, as seen from the I2C bus.
///
/// Owns the shared memory.  Only the request handler mutates it; responses
/// are served straight out of it.
///
/// The driver integration looks like:
/// - receive a controller write into [`Self::inbox_mut()`], then call
///   [`Self::on_request()`] with the number of bytes received
/// - serve a controller read from [`Self::response()`], then call
///   [`Self::on_response_sent()`]
/// - call [`Self::on_error()`] on any bus error
///
/// None of these block or allocate.
pub struct I2cEngine<'q> {
    addr: u16,
    memory: [u8; MEM_SIZE],
    inbox: [u8; INBOX_SIZE],
    response: Option<(usize, usize)>,
    poster: Poster<'q>,
    dropped: u32,
}

impl<'q> I2cEngine<'q> {
    /// Create a new I2cEngine, with zeroed memory, posting its events to
    /// `poster`.
    pub fn new(poster: Poster<'q>) -> Self {
        Self {
            addr: 0,
            memory: [0; MEM_SIZE],
            inbox: [0; INBOX_SIZE],
            response: None,
            poster,
            dropped: 0,
        }
    }

    /// Receive buffer for the next controller write
    pub fn inbox_mut(&mut self) -> &mut [u8] {
        &mut self.inbox
    }

    /// Handle a request received from the I2C controller.
    ///
    /// The first two bytes of the inbox are the register address.  Any
    /// further bytes are stored from that address, clipped to the end of the
    /// memory.  Either way, the following read will be served from that
    /// address.
    ///
    /// Context: interrupt
    pub fn on_request(&mut self, received: usize) {
        let received = received.min(INBOX_SIZE);
        if received == 0 {
            return;
        }

        // A lone byte is the low address byte: do not pick up a stale high
        // byte from a previous transaction.
        let high = if received >= ADDR_SIZE { self.inbox[1] } else { 0 };
        self.addr = u16::from_le_bytes([self.inbox[0], high]) & ADDR_MASK;

        let start = usize::from(self.addr);
        let span = MEM_SIZE - start;

        if received > ADDR_SIZE {
            let size = (received - ADDR_SIZE).min(span);
            self.memory[start..start + size]
                .copy_from_slice(&self.inbox[ADDR_SIZE..ADDR_SIZE + size]);
            self.post(Event::Write {
                addr: self.addr,
                count: size as u16,
            });
        } else {
            self.post(Event::Read {
                addr: self.addr,
                count: received as u16,
            });
        }

        // Prepare for any read request
        self.response = Some((start, span));
    }

    /// Handle completion of a response sent back to the controller.
    ///
    /// Context: interrupt
    pub fn on_response_sent(&mut self) {
        self.response = None;
    }

    /// Handle an I2C target error.
    ///
    /// Context: interrupt
    pub fn on_error(&mut self, error: BusError) {
        self.addr = 0;
        self.post(Event::Error(error.code()));
    }

    /// Bytes to send if the controller reads now.  Empty if no address has
    /// been set since the last response.
    pub fn response(&self) -> &[u8] {
        match self.response {
            Some((start, len)) => &self.memory[start..start + len],
            None => &[],
        }
    }

    /// Address last accessed, already masked into the memory
    pub fn address(&self) -> u16 {
        self.addr
    }

    /// Read-only view of the shared memory
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Number of events lost because the mailbox was full
    pub fn dropped_events(&self) -> u32 {
        self.dropped
    }

    /// Notify the worker of a power cycle equivalent condition.
    ///
    /// Memory contents are kept.  From [`Context::Interrupt`] the event is
    /// dropped if the mailbox is full; from [`Context::Thread`] this spins
    /// until the worker makes room, so must not be called with the worker
    /// unable to run.
    pub fn reset(&mut self, context: Context) {
        match context {
            Context::Interrupt => self.post(Event::Init),
            Context::Thread => {
                let word = Event::Init.encode();
                while self.poster.enqueue(word).is_err() {
                    core::hint::spin_loop();
                }
            }
        }
    }

    // Non-blocking post.  A full mailbox only loses diagnostics.
    fn post(&mut self, event: Event) {
        if self.poster.enqueue(event.encode()).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }
}

/// Drains the mailbox outside interrupt context and logs each event.
pub struct Worker<'q> {
    fetcher: Fetcher<'q>,
    handled: u32,
}

impl<'q> Worker<'q> {
    pub fn new(fetcher: Fetcher<'q>) -> Self {
        Self {
            fetcher,
            handled: 0,
        }
    }

    /// Configure the I2C peripheral as a target, so engine events start
    /// flowing.
    pub fn start<B: SlaveBus>(
        &mut self,
        bus: &mut B,
        config: &I2cConfig,
    ) -> core::result::Result<(), B::Error> {
        bus.configure(config).inspect_err(|e| {
            error!("I2C target configuration failed: {e:?}");
        })?;
        info!("I2C Running");
        debug!(
            "I2C address {:#04x}, timeout {}ms",
            config.address, config.slave_timeout_ms
        );
        Ok(())
    }

    /// Handle one mailbox word, if any.
    pub fn poll(&mut self) -> Option<EventWord> {
        let word = self.fetcher.dequeue()?;
        self.report(word);
        self.handled = self.handled.wrapping_add(1);
        Some(word)
    }

    /// Handle every word currently in the mailbox.  Returns how many.
    pub fn service(&mut self) -> usize {
        let mut count = 0;
        while self.poll().is_some() {
            count += 1;
        }
        count
    }

    /// Number of words handled since creation
    pub fn handled(&self) -> u32 {
        self.handled
    }

    fn report(&self, word: EventWord) {
        match word.decode() {
            Some(event) => info!("{event}"),
            None => warn!("Unmanaged message: {}", word.kind()),
        }
    }
}
