use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use sepet_pool::SlotPool;

#[test]
fn test_fill_within_capacity() {
    let pool = SlotPool::new();
    for i in 0..10 {
        pool.push(i);
    }
    let mut got = Vec::new();
    while let Some(v) = pool.try_pop() {
        got.push(v);
    }
    got.sort_unstable();
    let expected: Vec<_> = (0..10).collect();
    assert_eq!(got, expected);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_producers_consumers() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let pool = Arc::new(SlotPool::with_segment_capacity(8));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    pool.push(t * PER_PRODUCER + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut got = Vec::new();
                while got.len() < PER_PRODUCER {
                    if let Some(v) = pool.try_pop() {
                        got.push(v);
                    } else {
                        thread::yield_now();
                    }
                }
                got
            })
        })
        .collect();

    for h in producers {
        h.join().unwrap();
    }
    let mut seen = HashSet::new();
    for h in consumers {
        for v in h.join().unwrap() {
            assert!(seen.insert(v), "value {} popped twice", v);
        }
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(pool.try_pop(), None);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_growth_under_pressure() {
    // Tiny initial segment, producers only; every push must land despite
    // constant growth races.
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2000;

    let pool = Arc::new(SlotPool::with_segment_capacity(1));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    pool.push(t * PER_THREAD + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut seen = HashSet::new();
    while let Some(v) = pool.try_pop() {
        assert!(seen.insert(v));
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_clear_races_pushers() {
    const PUSHERS: usize = 4;
    const PER_THREAD: usize = 5000;

    let pool = Arc::new(SlotPool::new());

    let pushers: Vec<_> = (0..PUSHERS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    pool.push(i as u64);
                }
            })
        })
        .collect();

    let clearer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for _ in 0..100 {
                pool.clear();
                thread::yield_now();
            }
        })
    };

    for h in pushers {
        h.join().unwrap();
    }
    clearer.join().unwrap();

    // Whatever survived the clears must still be well-formed values.
    while let Some(v) = pool.try_pop() {
        assert!(v < PER_THREAD as u64);
    }
}
