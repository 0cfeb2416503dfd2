//! Synchronous command state machine, driven by the host link reader.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::String;
use lock_api::{Mutex, MutexGuard, RawMutex};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::cmd::{ACK_CASE_BIT, Command, ERROR_REPORT_CODE, Frame, Request, State};
use crate::config::BuildInfo;
use crate::io::Transport;
use crate::{Error, Result};

/// Longest acknowledgement line, `E -128\n` plus slack
const ACK_LINE_SIZE: usize = 8;

/// Transmit lock used by [`TxPort::new()`]: a spinlock.
pub type SpinRawMutex = spin::Mutex<()>;

/// Shared transmit side of the host link.
///
/// Owns the [`Transport`] behind the exclusive transmit lock, so that at most
/// one writer talks to the host at a time: byte echo, a whole command reply,
/// or a streamed message.  Typically a `static`, shared between the
/// [`CommandMachine`] and any subsystem streaming diagnostics.
///
/// ```rust,ignore
/// static HOST: TxPort<UsbTx> = TxPort::new(UsbTx::new());
///
/// // From any subsystem
/// HOST.stream_msg(b"sensor ready\n");
/// ```
///
/// # Locking
///
/// The lock is held for the whole of a [`Transport::send_reply()`] call,
/// which may block on the link.  Echo and command replies wait for it;
/// streaming never does.
///
/// The default [`SpinRawMutex`] busy-waits.  It is only safe when every
/// context using the port runs at the same priority, or on separate cores:
/// if the command machine preempts a lower priority context in the middle
/// of [`Self::stream_msg()`], it spins forever.  Otherwise supply a
/// [`RawMutex`] that blocks the waiter and lets the holder run, such as an
/// RTOS mutex, with [`Self::with_lock()`]:
///
/// ```rust,ignore
/// static HOST: TxPort<UsbTx, RtosRawMutex> = TxPort::with_lock(UsbTx::new());
/// ```
pub struct TxPort<T: Transport, R: RawMutex = SpinRawMutex> {
    link: Mutex<R, T>,
    can_tx: AtomicBool,
}

impl<T: Transport> TxPort<T> {
    /// Create a new TxPort using a spinlock.  Streaming is not permitted
    /// until [`Self::signal_link()`] reports the host available.
    pub const fn new(link: T) -> Self {
        Self::with_lock(link)
    }
}

impl<T: Transport, R: RawMutex> TxPort<T, R> {
    /// Create a new TxPort whose transmit lock is an `R`.
    pub const fn with_lock(link: T) -> Self {
        Self {
            link: Mutex::const_new(R::INIT, link),
            can_tx: AtomicBool::new(false),
        }
    }

    /// Echo a received byte back to the host.
    pub fn echo(&self, byte: u8) {
        let mut link = self.lock();
        send(&mut *link, &[byte]);
    }

    /// Push stream data to the host, if possible.
    ///
    /// If a command reply is being sent, or the host link is not available,
    /// the data is simply discarded: this never queues or waits for the lock.
    ///
    /// Returns whether the data was handed to the transport.
    pub fn stream_msg(&self, data: &[u8]) -> bool {
        let Some(mut link) = self.link.try_lock() else {
            trace!("Stream dropped, reply in progress");
            return false;
        };

        if !self.can_tx.load(Ordering::Acquire) {
            return false;
        }

        send(&mut *link, data)
    }

    /// Signal explicit end of streaming.  Sends an empty line, then stops any
    /// further streaming until the link is signalled available again.
    pub fn signal_eos(&self) {
        self.stream_msg(b"\n");
        self.can_tx.store(false, Ordering::Release);
    }

    /// Signal whether communication with the host is possible.
    pub fn signal_link(&self, available: bool) {
        debug!("Host link available: {available}");
        self.can_tx.store(available, Ordering::Release);
    }

    /// Whether streaming is currently permitted
    pub fn can_stream(&self) -> bool {
        self.can_tx.load(Ordering::Acquire)
    }

    /// Take the transport back.
    pub fn into_inner(self) -> T {
        self.link.into_inner()
    }

    fn lock(&self) -> MutexGuard<'_, R, T> {
        self.link.lock()
    }
}

// Send to the host.  Transport errors are logged and absorbed.
fn send<T: Transport>(link: &mut T, data: &[u8]) -> bool {
    trace!("Tx> {data:02x?}");
    match link.send_reply(data) {
        Ok(()) => true,
        Err(e) => {
            warn!("Host link send failed: {e:?}");
            false
        }
    }
}

/// Command state machine for one host connection.
///
/// Feed it every byte received from the host with [`Self::receive_byte()`]
/// or [`Self::receive()`].  Bytes and dispatch are expected to be delivered
/// from a single context, one at a time.  The reply is sent from within the
/// call delivering the final newline.
///
/// A new machine is [`State::Idle`] and ignores input (other than echoing
/// it) until [`Self::reset()`], which the host link owner calls whenever the
/// link comes up or goes down.
pub struct CommandMachine<'p, T: Transport, R: RawMutex = SpinRawMutex> {
    port: &'p TxPort<T, R>,
    state: State,
    step: u8,
    error: Option<Error>,
    frame: Frame,
    build: BuildInfo,
}

impl<'p, T: Transport, R: RawMutex> CommandMachine<'p, T, R> {
    /// Create a new CommandMachine transmitting through `port`.
    pub fn new(port: &'p TxPort<T, R>) -> Self {
        Self {
            port,
            state: State::Idle,
            step: 0,
            error: None,
            frame: Frame::new(),
            build: BuildInfo::current(),
        }
    }

    /// Use `build` as the identity reported by the identify command.
    pub fn with_build_info(mut self, build: BuildInfo) -> Self {
        self.build = build;
        self
    }

    /// Reset the state machine, discarding any partially received request,
    /// and get ready to receive a command.
    pub fn reset(&mut self) {
        self.frame.clear();
        self.step = 0;
        self.error = None;
        self.state = State::RxCmd;
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Error recorded while receiving the current request
    pub fn last_error(&self) -> Option<Error> {
        self.error
    }

    pub fn port(&self) -> &'p TxPort<T, R> {
        self.port
    }

    /// Inject a chunk of received bytes.
    pub fn receive(&mut self, bytes: &[u8]) {
        trace!("Rx< {bytes:02x?}");
        for &byte in bytes {
            self.receive_byte(byte);
        }
    }

    /// Inject a new received byte into the state machine.
    pub fn receive_byte(&mut self, byte: u8) {
        self.port.echo(byte);

        match self.state {
            State::RxCmd => {
                self.frame.set_code(byte);
                self.state = State::RxArg;
            }
            State::RxArg => match byte {
                b' ' | b':' => {}
                b'\n' => {
                    self.state = State::Request;
                    self.dispatch();
                }
                _ => {
                    if let Err(e) = self.accept_arg(byte) {
                        debug!("Bad argument byte {byte:#04x}: {e}");
                        self.error = Some(e);
                        self.state = State::Error;
                    }
                }
            },
            State::Error => {
                // Only a newline gets us out, reporting the error
                if byte == b'\n' {
                    self.state = State::Request;
                    self.frame.set_code(ERROR_REPORT_CODE);
                    self.dispatch();
                }
            }
            // The peer is not supposed to send while we are not ready or
            // replying.  If it gets out of sync, it breaks the link, which
            // resets us.
            State::Idle | State::Request | State::Tx => {}
        }
    }

    fn accept_arg(&mut self, byte: u8) -> Result<()> {
        if self.frame.len() >= crate::config::FRAME_SIZE {
            return Err(Error::TooLarge);
        }
        if !byte.is_ascii_alphanumeric() {
            return Err(Error::InvalidChar);
        }
        self.frame.push_arg(byte)
    }

    fn dispatch(&mut self) {
        let code = self.frame.code();
        let command = Command::from_code(code);
        let is_async = command.is_some_and(Command::is_async);

        self.reply(code, is_async, |request| match command {
            Some(command) => command.handle(request),
            None => Err(Error::NotImplemented),
        });
    }

    // Run `handle` step by step and send its reply, holding the transmit
    // lock throughout.  An async reply is left open for the handler's owner
    // to end with `TxPort::signal_eos()`.
    fn reply<H>(&mut self, code: u8, is_async: bool, mut handle: H)
    where
        H: FnMut(&mut Request<'_>) -> Result<()>,
    {
        self.state = State::Tx;
        self.step = 0;

        let port = self.port;
        let mut link = port.lock();
        let mut ack_sent = false;

        loop {
            let mut request = Request {
                step: self.step,
                last_error: self.error,
                frame: &mut self.frame,
                build: &self.build,
            };
            let rc = handle(&mut request);

            if !ack_sent {
                send(&mut *link, ack_line(code, rc).as_bytes());
                ack_sent = true;
            }

            if let Err(e) = rc {
                debug!("Command {:?} failed: {e}", code as char);
                break;
            }

            if self.frame.is_empty() {
                if !is_async {
                    // End of response
                    send(&mut *link, b"\n");
                }
                break;
            }

            send(&mut *link, self.frame.payload());
            self.frame.clear();
            self.step = self.step.wrapping_add(1);
        }

        drop(link);

        debug!("Command {:?} complete after {} chunk(s)", code as char, self.step);
        self.reset();
    }
}

/// Format the acknowledgement line for a handler's first result.
fn ack_line(code: u8, rc: Result<()>) -> String<ACK_LINE_SIZE> {
    let mut line = String::new();
    let written = match rc {
        Ok(()) => writeln!(line, "{} 0", (code | ACK_CASE_BIT) as char),
        Err(e) => writeln!(line, "E {}", e.code()),
    };
    if written.is_err() {
        warn!("Ack line for {code:#04x} truncated: {line:?}");
    }
    line
}
