//! Host command channel: request framing, command table and reply sequencing.
//!
//! See [`crate`] for the wire format.  [`CommandMachine`] consumes bytes and
//! dispatches complete requests to a [`Command`], sending the reply through a
//! shared [`TxPort`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncLink, LinkPump};
pub use sync::{CommandMachine, SpinRawMutex, TxPort};

use heapless::Vec;

use crate::config::{BuildInfo, FRAME_SIZE};
use crate::{Error, Result};

/// Command code reserved for the error report, also injected by the state
/// machine after a malformed line.
pub const ERROR_REPORT_CODE: u8 = b'@';

/// Bit turning an uppercase ASCII command code into its lowercase ack form.
pub const ACK_CASE_BIT: u8 = 0x20;

/// Command state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not ready to do anything
    Idle,
    /// Ready to receive a command
    RxCmd,
    /// Receiving arguments
    RxArg,
    /// A full request has been received
    Request,
    /// Sending the reply
    Tx,
    /// Malformed request, draining until end of line
    Error,
}

/// A single request: command code plus argument or reply payload.
///
/// The payload holds the received argument characters until the handler
/// runs, then the chunk the handler wants sent.  It never exceeds
/// [`FRAME_SIZE`] bytes: anything larger is an error, not a truncation.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    code: u8,
    payload: Vec<u8, FRAME_SIZE>,
}

impl Frame {
    pub const fn new() -> Self {
        Self {
            code: 0,
            payload: Vec::new(),
        }
    }

    /// Received command code
    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, if it is valid UTF-8
    pub fn message(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn clear(&mut self) {
        self.payload.clear();
    }

    /// Replace the payload with `msg`.
    ///
    /// Leaves the payload empty and returns [`Error::TooLarge`] if `msg`
    /// does not fit.
    pub fn set_message(&mut self, msg: &str) -> Result<()> {
        self.payload.clear();
        self.payload.extend_from_slice(msg.as_bytes()).map_err(|_| {
            self.payload.clear();
            Error::TooLarge
        })
    }

    pub(crate) fn set_code(&mut self, code: u8) {
        self.code = code;
    }

    pub(crate) fn push_arg(&mut self, byte: u8) -> Result<()> {
        self.payload.push(byte).map_err(|_| Error::TooLarge)
    }
}

impl core::fmt::Write for Frame {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.payload
            .extend_from_slice(s.as_bytes())
            .map_err(|_| core::fmt::Error)
    }
}

/// What a handler gets to work with on each invocation.
pub struct Request<'a> {
    /// Number of payload chunks already sent for this dispatch
    pub step: u8,
    /// Error recorded while receiving the request, if any
    pub last_error: Option<Error>,
    /// Received arguments on the first step, empty afterwards.  The handler
    /// leaves the next chunk to send here, or nothing to end the reply.
    pub frame: &'a mut Frame,
    /// Firmware identity
    pub build: &'a BuildInfo,
}

/// Built-in commands, keyed by their single letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `@`: report the last recorded error
    ErrorReport,
    /// `H`: help
    Help,
    /// `I`: identify the firmware
    Identify,
}

impl Command {
    /// Look up the command for a received code.  `None` for anything not in
    /// the table.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            ERROR_REPORT_CODE => Some(Command::ErrorReport),
            b'H' => Some(Command::Help),
            b'I' => Some(Command::Identify),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Command::ErrorReport => ERROR_REPORT_CODE,
            Command::Help => b'H',
            Command::Identify => b'I',
        }
    }

    /// Whether the command completes asynchronously.  Such commands omit the
    /// terminating empty line, which is sent later with
    /// [`TxPort::signal_eos()`].
    pub const fn is_async(self) -> bool {
        match self {
            Command::ErrorReport | Command::Help | Command::Identify => false,
        }
    }

    /// Run one step of the command.
    ///
    /// Returns `Ok(())` with the next chunk staged in the frame (empty to
    /// finish), or the error to report in the acknowledgement.
    pub fn handle(self, request: &mut Request<'_>) -> Result<()> {
        match self {
            Command::ErrorReport => error_report(request),
            Command::Help => help(request),
            Command::Identify => identify(request),
        }
    }
}

fn error_report(request: &mut Request<'_>) -> Result<()> {
    request.frame.clear();
    match request.last_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Lines of the help reply, one per step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelpLine {
    Help,
    Identify,
}

impl HelpLine {
    fn at(step: u8) -> Option<Self> {
        match step {
            0 => Some(HelpLine::Help),
            1 => Some(HelpLine::Identify),
            _ => None,
        }
    }

    fn text(self) -> &'static str {
        match self {
            HelpLine::Help => "H:          Help\n",
            HelpLine::Identify => "I:          Identify\n",
        }
    }
}

fn help(request: &mut Request<'_>) -> Result<()> {
    match HelpLine::at(request.step) {
        Some(line) => request.frame.set_message(line.text()),
        None => {
            request.frame.clear();
            Ok(())
        }
    }
}

/// Steps of the identify reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentStep {
    Line,
    Done,
}

impl IdentStep {
    fn at(step: u8) -> Self {
        if step == 0 {
            IdentStep::Line
        } else {
            IdentStep::Done
        }
    }
}

fn identify(request: &mut Request<'_>) -> Result<()> {
    use core::fmt::Write;

    request.frame.clear();
    match IdentStep::at(request.step) {
        IdentStep::Line => {
            let build = request.build;
            writeln!(
                request.frame,
                "i: {}{}-{} ({})",
                build.mode(),
                build.version,
                build.git_ref,
                build.build_date
            )
            .map_err(|_| {
                request.frame.clear();
                Error::TooLarge
            })
        }
        IdentStep::Done => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> BuildInfo {
        BuildInfo {
            debug: false,
            version: "0.1.0",
            git_ref: "g1234abc",
            build_date: "20250311",
        }
    }

    fn run(command: Command, step: u8, frame: &mut Frame) -> Result<()> {
        let build = build();
        let mut request = Request {
            step,
            last_error: None,
            frame,
            build: &build,
        };
        command.handle(&mut request)
    }

    #[test]
    fn lookup_is_limited_to_table() {
        assert_eq!(Command::from_code(b'@'), Some(Command::ErrorReport));
        assert_eq!(Command::from_code(b'H'), Some(Command::Help));
        assert_eq!(Command::from_code(b'I'), Some(Command::Identify));
        for code in [b'A', b'J', b'Z', b'h', b'\n', 0, 0xff] {
            assert_eq!(Command::from_code(code), None, "code {code:#x}");
        }
        for command in [Command::ErrorReport, Command::Help, Command::Identify] {
            assert_eq!(Command::from_code(command.code()), Some(command));
            assert!(!command.is_async());
        }
    }

    #[test]
    fn help_steps_through_lines() {
        let mut frame = Frame::new();
        assert_eq!(run(Command::Help, 0, &mut frame), Ok(()));
        assert_eq!(frame.message(), Some("H:          Help\n"));
        assert_eq!(run(Command::Help, 1, &mut frame), Ok(()));
        assert_eq!(frame.message(), Some("I:          Identify\n"));
        assert_eq!(run(Command::Help, 2, &mut frame), Ok(()));
        assert!(frame.is_empty());
    }

    #[test]
    fn identify_single_line() {
        let mut frame = Frame::new();
        assert_eq!(run(Command::Identify, 0, &mut frame), Ok(()));
        assert_eq!(frame.message(), Some("i: r0.1.0-g1234abc (20250311)\n"));
        assert_eq!(run(Command::Identify, 1, &mut frame), Ok(()));
        assert!(frame.is_empty());
    }

    #[test]
    fn identify_overflow_is_an_error() {
        let long = BuildInfo {
            git_ref: "0123456789012345678901234567890123456789012345678901234567890123",
            ..build()
        };
        let mut frame = Frame::new();
        let mut request = Request {
            step: 0,
            last_error: None,
            frame: &mut frame,
            build: &long,
        };
        assert_eq!(Command::Identify.handle(&mut request), Err(Error::TooLarge));
        assert!(frame.is_empty());
    }

    #[test]
    fn error_report_returns_recorded_error() {
        let build = build();
        let mut frame = Frame::new();
        frame.push_arg(b'x').unwrap();
        let mut request = Request {
            step: 0,
            last_error: Some(Error::InvalidChar),
            frame: &mut frame,
            build: &build,
        };
        assert_eq!(
            Command::ErrorReport.handle(&mut request),
            Err(Error::InvalidChar)
        );
        request.last_error = None;
        assert_eq!(Command::ErrorReport.handle(&mut request), Ok(()));
        assert!(frame.is_empty());
    }

    #[test]
    fn frame_rejects_overflow() {
        let mut frame = Frame::new();
        for _ in 0..FRAME_SIZE {
            frame.push_arg(b'a').unwrap();
        }
        assert_eq!(frame.push_arg(b'a'), Err(Error::TooLarge));
        assert_eq!(frame.len(), FRAME_SIZE);

        let too_long = [b'x'; FRAME_SIZE + 1];
        let too_long = core::str::from_utf8(&too_long).unwrap();
        assert_eq!(frame.set_message(too_long), Err(Error::TooLarge));
        assert!(frame.is_empty());
    }
}
