//! I2C target memory, as seen by a controller.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use busmem::config::{MAILBOX_SLOTS, MEM_SIZE};
use busmem::i2c::{BusError, Context, Event, I2cEngine, Mailbox, Worker};

fn transact(engine: &mut I2cEngine<'_>, bytes: &[u8]) -> Vec<u8> {
    engine.inbox_mut()[..bytes.len()].copy_from_slice(bytes);
    engine.on_request(bytes.len());
    let response = engine.response().to_vec();
    engine.on_response_sent();
    response
}

#[test]
fn store_and_read_back() {
    let mut mailbox = Mailbox::new();
    let (poster, fetcher) = mailbox.split();
    let mut engine = I2cEngine::new(poster);
    let mut worker = Worker::new(fetcher);

    let data: Vec<u8> = (0..=255).collect();
    let mut write = vec![0x00, 0x08];
    write.extend_from_slice(&data);
    transact(&mut engine, &write);

    let read = transact(&mut engine, &[0x00, 0x08]);
    assert_eq!(read.len(), MEM_SIZE - 0x800);
    assert_eq!(&read[..256], &data[..]);
    assert_eq!(worker.service(), 2);
}

#[test]
fn high_address_bits_are_ignored() {
    let mut mailbox = Mailbox::new();
    let (poster, _fetcher) = mailbox.split();
    let mut engine = I2cEngine::new(poster);

    transact(&mut engine, &[0x00, 0x10, 0xAA]);
    assert_eq!(engine.memory()[0], 0xAA);
    assert_eq!(transact(&mut engine, &[0x00, 0xF0])[0], 0xAA);
}

#[test]
fn memory_survives_lost_events() {
    let mut mailbox = Mailbox::new();
    let (poster, mut fetcher) = mailbox.split();
    let mut engine = I2cEngine::new(poster);

    for addr in 0..(2 * MAILBOX_SLOTS as u8) {
        transact(&mut engine, &[addr, 0x00, !addr]);
    }
    engine.on_error(BusError::from_flags(0x20));
    engine.reset(Context::Interrupt);

    assert_eq!(engine.dropped_events(), MAILBOX_SLOTS as u32 + 2);
    for addr in 0..(2 * MAILBOX_SLOTS as u8) {
        assert_eq!(engine.memory()[usize::from(addr)], !addr);
    }

    assert_eq!(
        fetcher.dequeue().and_then(|w| w.decode()),
        Some(Event::Write { addr: 0, count: 1 })
    );
}
