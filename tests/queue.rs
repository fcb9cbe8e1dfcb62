//! Integration tests for the queue family

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use arenaq::{ArenaConfig, MultiQueue, PopError, Queue, SpinQueue};

/// Pushes until the node arena accepts; the lock-free queue may refuse
/// transiently while its prefetch worker splices a chunk in.
fn push_retry<T: Send + 'static>(queue: &Queue<T>, mut value: T) {
    loop {
        match queue.push(value) {
            Ok(()) => return,
            Err(err) => {
                value = err.into_inner();
                thread::yield_now();
            },
        }
    }
}

#[test]
fn spsc_preserves_order() {
    let queue: Arc<Queue<u32>> = Arc::new(Queue::new().unwrap());

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 1..=1000u32 {
                push_retry(&queue, i);
            }
        })
    };

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut seen = Vec::with_capacity(1000);
            while seen.len() < 1000 {
                match queue.pop() {
                    Ok(value) => seen.push(value),
                    Err(PopError::Empty) => thread::yield_now(),
                    Err(err) => panic!("pop failed: {err}"),
                }
            }
            seen
        })
    };

    producer.join().unwrap();
    let seen = consumer.join().unwrap();

    assert_eq!(seen, (1..=1000u32).collect::<Vec<_>>());
    assert!(queue.is_empty());
}

#[test]
fn mpmc_conservation_and_per_producer_order() {
    const PRODUCERS: u64 = 8;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 100_000;
    const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

    let queue: Arc<Queue<u64>> = Arc::new(Queue::new().unwrap());
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    push_retry(&queue, p * 1_000_000 + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    if consumed.load(Ordering::Relaxed) as u64 >= TOTAL {
                        break;
                    }
                    match queue.pop() {
                        Ok(value) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                            seen.push(value);
                        },
                        Err(PopError::Empty) => thread::yield_now(),
                        Err(err) => panic!("pop failed: {err}"),
                    }
                }
                seen
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let per_consumer: Vec<Vec<u64>> =
        consumers.into_iter().map(|c| c.join().unwrap()).collect();

    // Conservation: exactly TOTAL successful pops, one per push.
    let popped: usize = per_consumer.iter().map(Vec::len).sum();
    assert_eq!(popped as u64, TOTAL);

    // No double delivery and full coverage: the consumed set equals the
    // produced set.
    let mut unique = HashSet::with_capacity(popped);
    for value in per_consumer.iter().flatten() {
        assert!(unique.insert(*value), "value {value} delivered twice");
    }
    for p in 0..PRODUCERS {
        for i in 0..PER_PRODUCER {
            assert!(unique.contains(&(p * 1_000_000 + i)));
        }
    }

    // Per producer, each consumer observed a strictly increasing
    // subsequence (FIFO per queue).
    for seen in &per_consumer {
        for p in 0..PRODUCERS {
            let lo = p * 1_000_000;
            let hi = lo + PER_PRODUCER;
            let mut last = None;
            for &value in seen.iter().filter(|&&v| v >= lo && v < hi) {
                if let Some(prev) = last {
                    assert!(value > prev, "producer {p}: {value} after {prev}");
                }
                last = Some(value);
            }
        }
    }

    assert!(queue.is_empty());
}

#[test]
fn pop_on_empty_is_empty() {
    let queue: Queue<u8> = Queue::with_config(ArenaConfig::new(4)).unwrap();
    assert_eq!(queue.pop(), Err(PopError::Empty));
    queue.push(1).unwrap();
    assert_eq!(queue.pop(), Ok(1));
    assert_eq!(queue.pop(), Err(PopError::Empty));
}

#[test]
fn saturated_queue_refuses_push() {
    let config = ArenaConfig::new(2).with_size_limit(2);
    let queue: Queue<u32> = Queue::with_config(config).unwrap();

    queue.push(1).unwrap();
    queue.push(2).unwrap();

    let err = queue.push(3).unwrap_err();
    assert_eq!(err.into_inner(), 3);
    assert_eq!(queue.size(), 2);

    // Popping frees a node; pushing works again.
    assert_eq!(queue.pop(), Ok(1));
    queue.push(3).unwrap();
    assert_eq!(queue.pop(), Ok(2));
    assert_eq!(queue.pop(), Ok(3));
}

#[test]
fn size_tracks_arena_in_use_count() {
    let queue: Queue<u64> = Queue::with_config(ArenaConfig::new(8)).unwrap();

    for i in 0..6 {
        queue.push(i).unwrap();
        assert_eq!(queue.size(), (i + 1) as usize);
    }
    for i in 0..6 {
        assert_eq!(queue.pop(), Ok(i));
        assert_eq!(queue.size(), 5 - i as usize);
    }
}

#[test]
fn multi_queue_conservation() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 20_000;
    const TOTAL: u64 = PRODUCERS as u64 * PER_PRODUCER;

    let multi: Arc<MultiQueue<u64>> =
        Arc::new(MultiQueue::with_config(PRODUCERS, ArenaConfig::new(512)).unwrap());
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS as u64)
        .map(|p| {
            let multi = Arc::clone(&multi);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut value = p * PER_PRODUCER + i;
                    loop {
                        match multi.push(value) {
                            Ok(()) => break,
                            Err(err) => {
                                value = err.into_inner();
                                thread::yield_now();
                            },
                        }
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let multi = Arc::clone(&multi);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut sum = 0u64;
                loop {
                    if consumed.load(Ordering::Relaxed) as u64 >= TOTAL {
                        break;
                    }
                    match multi.pop() {
                        Ok(value) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                            sum += value;
                        },
                        Err(PopError::Empty) => thread::yield_now(),
                        Err(err) => panic!("pop failed: {err}"),
                    }
                }
                sum
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let sum: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();

    assert_eq!(sum, TOTAL * (TOTAL - 1) / 2);
    assert!(multi.is_empty());
}

#[test]
fn spin_queue_mpmc_smoke() {
    const TOTAL: u64 = 40_000;

    let queue: Arc<SpinQueue<u64>> =
        Arc::new(SpinQueue::with_config(ArenaConfig::new(256)).unwrap());
    let consumed = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4u64)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..TOTAL / 4 {
                    let mut value = p * (TOTAL / 4) + i;
                    loop {
                        match queue.push(value) {
                            Ok(()) => break,
                            Err(err) => {
                                value = err.into_inner();
                                thread::yield_now();
                            },
                        }
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            thread::spawn(move || {
                let mut sum = 0u64;
                loop {
                    if consumed.load(Ordering::Relaxed) as u64 >= TOTAL {
                        break;
                    }
                    match queue.pop() {
                        Ok(value) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                            sum += value;
                        },
                        Err(_) => thread::yield_now(),
                    }
                }
                sum
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let sum: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();

    assert_eq!(sum, TOTAL * (TOTAL - 1) / 2);
    assert!(queue.is_empty());
}
