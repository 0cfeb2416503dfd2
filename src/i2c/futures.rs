//! Asynchronous I2C worker loop.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::i2c::{EventWord, Worker};
use crate::io::AsyncDelay;

impl Worker<'_> {
    /// Wait for the next mailbox word, sleeping `D` between empty polls, and
    /// log it.
    pub async fn fetch<D: AsyncDelay>(&mut self) -> EventWord {
        loop {
            if let Some(word) = self.poll() {
                return word;
            }
            D::delay().await;
        }
    }

    /// Log events forever.
    ///
    /// ```rust,ignore
    /// #[embassy_executor::task]
    /// async fn i2c_worker(mut worker: Worker<'static>, mut bus: I2cTarget) -> ! {
    ///     worker.start(&mut bus, &I2cConfig::default()).ok();
    ///     worker.run::<PollDelay>().await
    /// }
    /// ```
    pub async fn run<D: AsyncDelay>(&mut self) -> ! {
        loop {
            let word = self.fetch::<D>().await;
            trace!("I2C mailbox word {:#010x}", word.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::{Event, Mailbox};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use futures::executor::block_on;

    static DELAYS: AtomicUsize = AtomicUsize::new(0);

    struct CountingDelay;

    impl AsyncDelay for CountingDelay {
        async fn delay() {
            DELAYS.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct NoDelay;

    impl AsyncDelay for NoDelay {
        async fn delay() {}
    }

    #[test]
    fn fetch_returns_queued_words_in_order() {
        let mut mailbox = Mailbox::new();
        let (mut poster, fetcher) = mailbox.split();
        let mut worker = Worker::new(fetcher);

        poster.enqueue(Event::Init.encode()).unwrap();
        poster
            .enqueue(Event::Read { addr: 4, count: 2 }.encode())
            .unwrap();

        assert_eq!(block_on(worker.fetch::<NoDelay>()), Event::Init.encode());
        assert_eq!(
            block_on(worker.fetch::<NoDelay>()).decode(),
            Some(Event::Read { addr: 4, count: 2 })
        );
        assert_eq!(worker.handled(), 2);
    }

    #[test]
    fn fetch_delays_only_when_empty() {
        let mut mailbox = Mailbox::new();
        let (mut poster, fetcher) = mailbox.split();
        let mut worker = Worker::new(fetcher);

        poster.enqueue(EventWord(0x7000_0000)).unwrap();
        let before = DELAYS.load(Ordering::Relaxed);
        assert_eq!(
            block_on(worker.fetch::<CountingDelay>()),
            EventWord(0x7000_0000)
        );
        assert_eq!(DELAYS.load(Ordering::Relaxed), before);
    }
}
