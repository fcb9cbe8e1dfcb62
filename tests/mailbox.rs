//! Integration tests for the mailbox

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arenaq::{ArenaConfig, Mailbox, ReadError};

#[test]
fn timeout_then_delivery() {
    let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new("scenario").unwrap());

    // Empty mailbox: a 50 ms read times out within sane bounds.
    let start = Instant::now();
    assert_eq!(mailbox.read(Duration::from_millis(50)), Err(ReadError::Timeout));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(200), "overslept: {elapsed:?}");

    // A writer posts 7; a 1 s read delivers it.
    let writer = {
        let mailbox = Arc::clone(&mailbox);
        thread::spawn(move || mailbox.write(7).unwrap())
    };
    let value = mailbox.read(Duration::from_secs(1));
    writer.join().unwrap();

    assert_eq!(value, Ok(7));
}

#[test]
fn readers_block_until_mail() {
    let mailbox: Arc<Mailbox<u64>> =
        Arc::new(Mailbox::with_config("workers", ArenaConfig::new(64)).unwrap());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                let mut got = Vec::new();
                while got.len() < 25 {
                    match mailbox.read(Duration::from_secs(5)) {
                        Ok(value) => got.push(value),
                        Err(err) => panic!("read failed: {err}"),
                    }
                }
                got
            })
        })
        .collect();

    for i in 0..100u64 {
        mailbox.write(i).unwrap();
        if i % 10 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let mut all: Vec<u64> = readers.into_iter().flat_map(|r| r.join().unwrap()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..100).collect::<Vec<_>>());
    assert!(mailbox.is_empty());
}

#[test]
fn name_and_counters() {
    let mailbox: Mailbox<u8> = Mailbox::with_config("inbox", ArenaConfig::new(4)).unwrap();
    assert_eq!(mailbox.name(), "inbox");
    assert!(mailbox.is_empty());

    mailbox.write(1).unwrap();
    mailbox.write(2).unwrap();
    assert_eq!(mailbox.size(), 2);

    assert_eq!(mailbox.read(Duration::ZERO), Ok(1));
    assert_eq!(mailbox.read(Duration::ZERO), Ok(2));
}
