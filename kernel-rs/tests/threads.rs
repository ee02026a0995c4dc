//! Thread and synchronization behavior: mutual exclusion under forced
//! interleaving, condition variable wakeup discipline, rendezvous ports,
//! join, and priority donation.

mod common;

use std::sync::Arc;

use kernel::{
    proc::{self, Thread},
    synch::{Condition, Lock, Port, Semaphore, Spinlock},
};

#[test]
fn lock_protects_a_counter_across_yields() {
    const ROUNDS: usize = 100;
    let kernel = common::boot();
    kernel.run(|ctx| {
        let lock = Arc::new(Lock::new("counter"));
        let counter = Arc::new(Spinlock::new("counter cell", 0u64));

        let mut workers = Vec::new();
        for name in ["adder-a", "adder-b"].iter() {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            workers.push(Thread::fork(
                ctx.kernel_arc(),
                name,
                0,
                true,
                None,
                move |tctx| {
                    for _ in 0..ROUNDS {
                        lock.acquire(tctx);
                        let seen = *counter.lock();
                        // Give the other thread every chance to barge in.
                        tctx.kernel().scheduler().yield_now(tctx);
                        *counter.lock() = seen + 1;
                        lock.release(tctx);
                    }
                },
            ));
        }
        for worker in workers {
            worker.join(ctx);
        }
        assert_eq!(*counter.lock(), 2 * ROUNDS as u64);
    });
}

#[test]
fn condition_signal_wakes_exactly_one_in_fifo_order() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let lock = Arc::new(Lock::new("cond lock"));
        let cond = Arc::new(Condition::new("cond", Arc::clone(&lock)));
        let waiting = Arc::new(Spinlock::new("waiting", 0u32));
        let order = Arc::new(Spinlock::new("wake order", Vec::<usize>::new()));

        let mut waiters = Vec::new();
        for id in 0..3usize {
            let lock = Arc::clone(&lock);
            let cond = Arc::clone(&cond);
            let waiting = Arc::clone(&waiting);
            let order = Arc::clone(&order);
            waiters.push(Thread::fork(
                ctx.kernel_arc(),
                "waiter",
                0,
                true,
                None,
                move |tctx| {
                    lock.acquire(tctx);
                    *waiting.lock() += 1;
                    cond.wait(tctx);
                    order.lock().push(id);
                    lock.release(tctx);
                },
            ));
        }

        // Let all three get onto the wait set.
        while *waiting.lock() < 3 {
            ctx.kernel().scheduler().yield_now(ctx);
        }

        // One signal releases exactly the oldest waiter.
        cond.signal(ctx);
        while order.lock().len() < 1 {
            ctx.kernel().scheduler().yield_now(ctx);
        }
        ctx.kernel().scheduler().yield_now(ctx);
        assert_eq!(*order.lock(), vec![0]);

        // Broadcast releases the rest, oldest first.
        cond.broadcast(ctx);
        for waiter in waiters {
            waiter.join(ctx);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    });
}

#[test]
fn port_pairs_senders_and_receivers_in_order() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let port = Arc::new(Port::new("test port"));

        let mut senders = Vec::new();
        for value in 0..3 {
            let port = Arc::clone(&port);
            senders.push(Thread::fork(
                ctx.kernel_arc(),
                "sender",
                0,
                true,
                None,
                move |tctx| {
                    assert!(port.send(tctx, value));
                },
            ));
        }

        // Receives pair with the senders in arrival order.
        assert_eq!(port.receive(ctx), Some(0));
        assert_eq!(port.receive(ctx), Some(1));
        assert_eq!(port.receive(ctx), Some(2));
        for sender in senders {
            sender.join(ctx);
        }
    });
}

#[test]
fn port_roundtrip_through_one_sender() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let port = Arc::new(Port::new("stream"));
        let sender = {
            let port = Arc::clone(&port);
            Thread::fork(ctx.kernel_arc(), "sender", 0, true, None, move |tctx| {
                for value in 10..15 {
                    assert!(port.send(tctx, value));
                }
            })
        };
        for expected in 10..15 {
            assert_eq!(port.receive(ctx), Some(expected));
        }
        sender.join(ctx);
    });
}

#[test]
fn port_teardown_releases_blocked_receiver() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let port = Arc::new(Port::new("doomed port"));
        let got_out = Arc::new(Spinlock::new("got out", false));
        let receiver = {
            let port = Arc::clone(&port);
            let got_out = Arc::clone(&got_out);
            Thread::fork(ctx.kernel_arc(), "receiver", 0, true, None, move |tctx| {
                assert_eq!(port.receive(tctx), None);
                *got_out.lock() = true;
            })
        };
        // Let the receiver block.
        ctx.kernel().scheduler().yield_now(ctx);
        port.destroy(ctx);
        receiver.join(ctx);
        assert!(*got_out.lock());
    });
}

#[test]
fn join_collects_the_exit_status() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let child = Thread::fork(ctx.kernel_arc(), "exiter", 0, true, None, |tctx| {
            proc::exit(tctx, 42)
        });
        assert_eq!(child.join(ctx), 42);

        let quiet = Thread::fork(ctx.kernel_arc(), "returner", 0, true, None, |_| {});
        assert_eq!(quiet.join(ctx), 0);
    });
}

#[test]
fn semaphore_wakes_waiters_in_fifo_order() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let sem = Arc::new(Semaphore::new("gate", 0));
        let order = Arc::new(Spinlock::new("order", Vec::<usize>::new()));

        let mut waiters = Vec::new();
        for id in 0..3usize {
            let sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            waiters.push(Thread::fork(
                ctx.kernel_arc(),
                "p-waiter",
                0,
                true,
                None,
                move |tctx| {
                    sem.p(tctx);
                    order.lock().push(id);
                },
            ));
        }
        // All three must be asleep on the semaphore before any V.
        while ctx.kernel().scheduler().ready_count() > 0 {
            ctx.kernel().scheduler().yield_now(ctx);
        }
        for _ in 0..3 {
            sem.v(ctx);
        }
        for waiter in waiters {
            waiter.join(ctx);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    });
}

#[test]
fn priority_donation_runs_the_holder_before_the_middle() {
    let kernel = common::boot();
    kernel.run(|ctx| {
        let lock = Arc::new(Lock::new("donated"));
        let events = Arc::new(Spinlock::new("events", Vec::<&'static str>::new()));

        let low = {
            let lock = Arc::clone(&lock);
            let events = Arc::clone(&events);
            Thread::fork(ctx.kernel_arc(), "low", 1, true, None, move |tctx| {
                lock.acquire(tctx);
                events.lock().push("L:acquired");
                tctx.kernel().scheduler().yield_now(tctx);
                events.lock().push("L:resumed");
                lock.release(tctx);
                events.lock().push("L:released");
            })
        };
        // Let L take the lock and yield back.
        ctx.kernel().scheduler().yield_now(ctx);
        assert_eq!(events.lock().first(), Some(&"L:acquired"));

        let middle = {
            let events = Arc::clone(&events);
            Thread::fork(ctx.kernel_arc(), "middle", 2, true, None, move |_| {
                events.lock().push("M:ran");
            })
        };
        let high = {
            let lock = Arc::clone(&lock);
            let events = Arc::clone(&events);
            Thread::fork(ctx.kernel_arc(), "high", 3, true, None, move |tctx| {
                lock.acquire(tctx);
                events.lock().push("H:acquired");
                lock.release(tctx);
            })
        };

        // H runs first, blocks on the lock and donates to L; L must then
        // outrun M until the release.
        ctx.kernel().scheduler().yield_now(ctx);
        low.join(ctx);
        middle.join(ctx);
        high.join(ctx);

        let events = events.lock();
        let pos = |tag: &str| {
            events
                .iter()
                .position(|e| *e == tag)
                .unwrap_or_else(|| panic!("missing event {}", tag))
        };
        assert!(pos("L:resumed") < pos("M:ran"), "events: {:?}", *events);
        assert!(pos("L:released") < pos("H:acquired"), "events: {:?}", *events);
        assert!(pos("H:acquired") < pos("M:ran"), "events: {:?}", *events);
    });
}
