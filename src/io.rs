//! Traits for the hardware the core talks to: the host link's transmit side,
//! the I2C target peripheral, and a delay for polling loops.
//!
//! # Possible implementations
//!
//! - On the target: USB CDC ACM class write for [`Transport`], the MCU's I2C
//!   peripheral driver for [`SlaveBus`], an executor timer for [`AsyncDelay`]
//! - For host testing: in-memory buffers recording what was sent
//!
//! Implementations are expected to be thin.  Framing, echo and ordering are
//! handled by [`crate::cmd`], never by the transport.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::config::I2cConfig;

/// Transmit side of the host link.
pub trait Transport {
    /// The error type returned by send operations.
    ///
    /// This allows implementations to use their own error types (e.g. a USB
    /// endpoint error).
    type Error: core::fmt::Debug;

    /// Send bytes to the host.
    ///
    /// The bytes are to be sent verbatim, in order, and before this call
    /// returns or is made again.  May block until the link accepts them.
    ///
    /// # Errors
    ///
    /// Returns an error if the link rejected the data.  Callers log and drop
    /// the data, there is no retry.
    fn send_reply(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn send_reply(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).send_reply(data)
    }
}

/// I2C target peripheral setup.
///
/// Request, response and error events are delivered by the driver calling
/// into [`crate::i2c::I2cEngine`]; this trait only covers configuring the
/// peripheral so those events start arriving.
pub trait SlaveBus {
    /// The error type returned by configuration.
    type Error: core::fmt::Debug;

    /// Start the peripheral as a target, matching `config.address` and
    /// aborting transactions longer than `config.slave_timeout_ms`.
    fn configure(&mut self, config: &I2cConfig) -> Result<(), Self::Error>;
}

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async loops to yield while there is nothing to do.  Each wait should last
/// [`crate::config::WORKER_POLL_MS`], which is also the unit the host link
/// settle time is counted in.
///
/// This trait keeps `busmem` free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_millis(10)).await;
///     }
/// }
/// ```
#[cfg(feature = "async")]
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}
