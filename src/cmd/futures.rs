//! Asynchronous host link pump - feeds the command state machine from the
//! host link's receive side.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use lock_api::RawMutex;

use crate::cmd::CommandMachine;
use crate::cmd::sync::SpinRawMutex;
use crate::config::{FRAME_SIZE, LINK_SETTLE_MS, WORKER_POLL_MS};
use crate::io::{AsyncDelay, Transport};
use crate::{Error, Result};

/// Receive side of the host link.
#[async_trait(?Send)]
pub trait AsyncLink {
    /// The error type returned by read operations.
    type Error: core::fmt::Debug;

    /// Whether the host is connected and the link configured
    fn is_active(&self) -> bool;

    /// Attach to or detach from the host, e.g. by toggling the USB pull-up.
    /// Links that cannot do so ignore this.
    fn set_connected(&mut self, _connected: bool) {}

    /// Read whatever the host has sent, up to `buf.len()` bytes.
    ///
    /// Should return `Ok(0)` after a short timeout if nothing arrived, so the
    /// pump can notice link state changes.
    async fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error>;
}

/// Drives a [`CommandMachine`] from an [`AsyncLink`].
///
/// [`Self::run()`] first detaches from the host and waits
/// [`LINK_SETTLE_MS`] before attaching, so a host that saw a previous
/// firmware instance re-enumerates the device.
///
/// It then tracks the link state: every time the link comes up or goes down, the
/// transmit port is told whether streaming is possible and the state machine
/// is reset, discarding any partial request.
///
/// Example usage:
///
/// ```rust,ignore
/// static HOST: TxPort<UsbTx> = TxPort::new(UsbTx::new());
///
/// #[embassy_executor::task]
/// async fn host_task(rx: UsbRx) -> ! {
///     let machine = CommandMachine::new(&HOST);
///     let mut pump = LinkPump::<_, _, Delay>::new(rx, machine);
///     pump.run().await
/// }
/// ```
pub struct LinkPump<'p, L: AsyncLink, T: Transport, D: AsyncDelay, R: RawMutex = SpinRawMutex>
{
    link: L,
    machine: CommandMachine<'p, T, R>,
    last_active: Option<bool>,
    _delay: core::marker::PhantomData<D>,
}

/// Number of [`AsyncDelay`] periods making up the settle time
const SETTLE_DELAYS: u32 = LINK_SETTLE_MS.div_ceil(WORKER_POLL_MS);

impl<'p, L: AsyncLink, T: Transport, D: AsyncDelay, R: RawMutex> LinkPump<'p, L, T, D, R> {
    /// Create a new LinkPump
    ///
    /// Arguments:
    /// - `link`: Host link receive side
    /// - `machine`: State machine to feed, and reset on link changes
    pub fn new(link: L, machine: CommandMachine<'p, T, R>) -> Self {
        Self {
            link,
            machine,
            last_active: None,
            _delay: core::marker::PhantomData,
        }
    }

    pub fn machine(&self) -> &CommandMachine<'p, T, R> {
        &self.machine
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Run one iteration: handle any link state change, then either deliver
    /// what the host sent, or wait a little if the link is down.
    ///
    /// Returns the number of bytes delivered to the state machine.
    pub async fn step(&mut self) -> Result<usize> {
        let active = self.link.is_active();

        if self.last_active != Some(active) {
            info!("Host link {}", if active { "active" } else { "inactive" });
            self.machine.port().signal_link(active);
            self.machine.reset();
            self.last_active = Some(active);
        }

        if !active {
            D::delay().await;
            return Ok(0);
        }

        let mut buf = [0u8; FRAME_SIZE];
        let count = self.link.read(&mut buf).await.map_err(|e| {
            warn!("Host link read failed: {e:?}");
            Error::Io
        })?;

        // Never trust the link to honour the buffer size
        let count = count.min(buf.len());
        if count > 0 {
            self.machine.receive(&buf[..count]);
        }

        Ok(count)
    }

    /// Detach from the host, let it notice, then attach again.
    pub async fn start(&mut self) {
        debug!("Host link settling for {LINK_SETTLE_MS}ms");
        self.link.set_connected(false);
        for _ in 0..SETTLE_DELAYS {
            D::delay().await;
        }
        self.link.set_connected(true);
        info!("Host link attached");
    }

    /// Start, then pump forever.  Read errors back off for one delay period.
    pub async fn run(&mut self) -> ! {
        self.start().await;
        loop {
            if self.step().await.is_err() {
                D::delay().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{State, TxPort};
    use futures::executor::block_on;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::collections::VecDeque;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        out: Vec<u8>,
    }

    impl Transport for Recorder {
        type Error = ();

        fn send_reply(&mut self, data: &[u8]) -> core::result::Result<(), ()> {
            self.out.extend_from_slice(data);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedLink {
        active: bool,
        chunks: VecDeque<core::result::Result<Vec<u8>, ()>>,
        attach: Vec<bool>,
    }

    #[async_trait(?Send)]
    impl AsyncLink for ScriptedLink {
        type Error = ();

        fn is_active(&self) -> bool {
            self.active
        }

        fn set_connected(&mut self, connected: bool) {
            self.attach.push(connected);
        }

        async fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, ()> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(())) => Err(()),
                None => Ok(0),
            }
        }
    }

    struct NoDelay;

    impl AsyncDelay for NoDelay {
        async fn delay() {}
    }

    static SETTLE_COUNT: AtomicU32 = AtomicU32::new(0);

    struct SettleDelay;

    impl AsyncDelay for SettleDelay {
        async fn delay() {
            SETTLE_COUNT.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn start_detaches_then_settles() {
        let port = TxPort::new(Recorder::default());
        let mut pump =
            LinkPump::<_, _, SettleDelay>::new(ScriptedLink::default(), CommandMachine::new(&port));
        block_on(pump.start());
        assert_eq!(pump.link_mut().attach, [false, true]);
        assert_eq!(SETTLE_COUNT.load(Ordering::Relaxed), 150);
        assert_eq!(pump.machine().state(), State::Idle);
    }

    #[test]
    fn link_up_resets_and_delivers() {
        let port = TxPort::new(Recorder::default());
        {
            let link = ScriptedLink {
                active: true,
                chunks: VecDeque::from([Ok(b"H".to_vec()), Ok(b"\n".to_vec())]),
                ..Default::default()
            };
            let mut pump = LinkPump::<_, _, NoDelay>::new(link, CommandMachine::new(&port));
            assert_eq!(pump.machine().state(), State::Idle);

            assert_eq!(block_on(pump.step()), Ok(1));
            assert!(port.can_stream());
            assert_eq!(pump.machine().state(), State::RxArg);

            assert_eq!(block_on(pump.step()), Ok(1));
            assert_eq!(pump.machine().state(), State::RxCmd);
            assert_eq!(block_on(pump.step()), Ok(0));
        }
        assert_eq!(
            port.into_inner().out,
            b"H\nh 0\nH:          Help\nI:          Identify\n\n"
        );
    }

    #[test]
    fn link_down_discards_partial_request() {
        let port = TxPort::new(Recorder::default());
        let link = ScriptedLink {
            active: true,
            chunks: VecDeque::from([Ok(b"H12".to_vec())]),
            ..Default::default()
        };
        let mut pump = LinkPump::<_, _, NoDelay>::new(link, CommandMachine::new(&port));

        assert_eq!(block_on(pump.step()), Ok(3));
        assert_eq!(pump.machine().state(), State::RxArg);

        pump.link_mut().active = false;
        assert_eq!(block_on(pump.step()), Ok(0));
        assert_eq!(pump.machine().state(), State::RxCmd);
        assert!(!port.can_stream());
    }

    #[test]
    fn read_error_is_reported() {
        let port = TxPort::new(Recorder::default());
        let link = ScriptedLink {
            active: true,
            chunks: VecDeque::from([Err(())]),
            ..Default::default()
        };
        let mut pump = LinkPump::<_, _, NoDelay>::new(link, CommandMachine::new(&port));
        assert_eq!(block_on(pump.step()), Err(Error::Io));
        assert_eq!(pump.machine().state(), State::RxCmd);
    }
}
