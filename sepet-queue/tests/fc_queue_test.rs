use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sepet_queue::FcQueue;

#[test]
fn test_sequential_fifo() {
    let q = FcQueue::new();
    for i in 0..1000 {
        q.push(i);
    }
    for i in 0..1000 {
        assert_eq!(q.try_pop(), Some(i));
    }
    assert_eq!(q.try_pop(), None);
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_push_then_pop() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1000;

    let q = Arc::new(FcQueue::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    q.push(t * PER_THREAD + i);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut seen = HashSet::new();
    while let Some(v) = q.try_pop() {
        assert!(seen.insert(v), "value {} popped twice", v);
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_per_thread_order_preserved() {
    const PUSHERS: usize = 4;
    const PER_THREAD: usize = 5000;

    let q = Arc::new(FcQueue::new());

    let pushers: Vec<_> = (0..PUSHERS)
        .map(|t| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    q.push((t, i));
                }
            })
        })
        .collect();

    let popper = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            let mut last = [0usize; PUSHERS];
            let mut popped = 0;
            while popped < PUSHERS * PER_THREAD {
                if let Some((t, i)) = q.try_pop() {
                    if i > 0 {
                        assert!(
                            i > last[t],
                            "thread {} reordered: {} after {}",
                            t,
                            i,
                            last[t]
                        );
                    }
                    last[t] = i;
                    popped += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    for h in pushers {
        h.join().unwrap();
    }
    popper.join().unwrap();
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_two_pushers_one_popper_multiset() {
    const TOTAL: usize = 1000;

    let q = Arc::new(FcQueue::new());

    // Evens and odds pushed from separate threads while the popper drains.
    let pushers: Vec<_> = (0..2)
        .map(|parity| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in (parity..TOTAL).step_by(2) {
                    q.push(i);
                }
            })
        })
        .collect();

    let popper = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            let mut drained = Vec::with_capacity(TOTAL);
            while drained.len() < TOTAL {
                match q.try_pop() {
                    Some(v) => drained.push(v),
                    None => thread::yield_now(),
                }
            }
            drained
        })
    };

    for h in pushers {
        h.join().unwrap();
    }
    let mut drained = popper.join().unwrap();
    drained.sort_unstable();
    let expected: Vec<_> = (0..TOTAL).collect();
    assert_eq!(drained, expected);
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_mpmc_balance() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 10_000;

    let q = Arc::new(FcQueue::new());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.push(i as u64);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut sum = 0u64;
                let mut count = 0usize;
                while count < PER_PRODUCER {
                    if let Some(v) = q.try_pop() {
                        sum += v;
                        count += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                sum
            })
        })
        .collect();

    for h in producers {
        h.join().unwrap();
    }
    let total: u64 = consumers.into_iter().map(|h| h.join().unwrap()).sum();

    let per_producer_sum = (PER_PRODUCER as u64 - 1) * PER_PRODUCER as u64 / 2;
    assert_eq!(total, PRODUCERS as u64 * per_producer_sum);
    assert!(q.is_empty());
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_eviction_under_churn() {
    // A staleness of zero evicts every idle record on every pass, forcing
    // threads to re-link constantly.
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2000;

    let q = Arc::new(FcQueue::with_staleness(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    q.push(t * PER_THREAD + i);
                    if i % 3 == 0 {
                        q.try_pop();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut remaining = 0;
    let mut seen = HashSet::new();
    while let Some(v) = q.try_pop() {
        assert!(seen.insert(v));
        remaining += 1;
    }
    let popped_inline = THREADS * (PER_THREAD / 3 + 1);
    assert!(remaining >= THREADS * PER_THREAD - popped_inline);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_pop_timeout_returns_under_contention() {
    const THREADS: usize = 8;

    let q: Arc<FcQueue<u32>> = Arc::new(FcQueue::new());

    // All threads race pop_timeout on an empty queue; every call must come
    // back None without hanging.
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for _ in 0..100 {
                    assert_eq!(q.pop_timeout(Duration::from_millis(1)), None);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_push_timeout_delivers_or_returns() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let q = Arc::new(FcQueue::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut delivered = 0usize;
                for i in 0..PER_THREAD {
                    if q.push_timeout(t * PER_THREAD + i, Duration::from_micros(50)).is_ok() {
                        delivered += 1;
                    }
                }
                delivered
            })
        })
        .collect();

    let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // Every delivered value comes out exactly once; returned values never
    // appear.
    let mut seen = HashSet::new();
    while let Some(v) = q.try_pop() {
        assert!(seen.insert(v), "value {} popped twice", v);
    }
    assert_eq!(seen.len(), delivered);
}
