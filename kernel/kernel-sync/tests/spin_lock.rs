use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_drop_releases_the_lock() {
    let lock = SpinLock::new(0_u32);

    {
        let mut held = lock.lock();
        *held = 41;
    }

    // a second lock() only returns if the first guard unlocked
    let mut held = lock.lock();
    *held += 1;
    assert_eq!(*held, 42);
}

#[test]
fn try_lock_fails_only_while_held() {
    let lock = SpinLock::new(1_u8);

    let held = lock.try_lock();
    assert_eq!(held.as_deref(), Some(&1));
    assert!(lock.try_lock().is_none(), "second holder must be refused");

    drop(held);
    assert!(lock.try_lock().is_some());
}

#[test]
fn lock_irq_is_exclusive_and_releases() {
    let lock = SpinLock::new(5_u32);

    {
        let mut held = lock.lock_irq();
        *held += 1;
        assert!(lock.try_lock().is_none(), "held lock must refuse try_lock");
    }

    assert_eq!(*lock.lock_irq(), 6);
}

#[test]
fn with_lock_returns_the_closure_value_and_unlocks() {
    let lock = SpinLock::new(String::from("a"));

    let len = lock.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);

    // the closure's guard is gone, so this must not spin
    assert_eq!(lock.with_lock(|s| s.clone()), "ab");
}

#[test]
fn get_mut_needs_no_guard() {
    let mut lock = SpinLock::new(vec![1, 2, 3]);
    lock.get_mut().push(4);
    assert_eq!(lock.lock().as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn contended_counter_is_exact() {
    let threads = 8;
    let iters = 4_000;

    let lock = Arc::new(SpinLock::new(0_usize));
    let holders = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let holders = Arc::clone(&holders);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with_lock(|count| {
                    let others = holders.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(others, 0, "two holders inside the critical section");
                    *count += 1;
                    holders.fetch_sub(1, Ordering::SeqCst);
                });
                thread::yield_now();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(lock.with_lock(|count| *count), threads * iters);
    assert_eq!(holders.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_holder_leaves_the_lock_usable() {
    let lock = SpinLock::new(0_u32);

    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|value| {
            *value = 123;
            panic!("boom");
        });
    }));
    assert!(outcome.is_err());

    // no poisoning: the unwound guard unlocked and the write stuck
    assert_eq!(lock.with_lock(|value| *value), 123);
}

#[test]
fn spinlock_with_send_contents_is_sync() {
    fn requires_sync<T: Sync>(_: &T) {}
    let lock = SpinLock::new(0_u8);
    requires_sync(&lock);
}
