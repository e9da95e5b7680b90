/*
 * reactor_test.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Reactor and StackContext integration: ordering guarantees, exception
 * routing from deferred callbacks and timers, cross-thread wakeups, and
 * periodic callbacks, all through the public API.
 */

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use squall_core::error::{Error, Result};
use squall_core::reactor::PeriodicCallback;
use squall_core::stack_context::{ExceptionStackContext, NullContext};
use squall_core::Reactor;

#[test]
fn callbacks_before_timers_when_both_ready() {
    let reactor = Reactor::new().unwrap();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    {
        let order = order.clone();
        reactor.add_timeout(Duration::from_millis(0), move || {
            order.borrow_mut().push("timer");
            Ok(())
        });
    }
    {
        let order = order.clone();
        reactor.add_callback(move || {
            order.borrow_mut().push("callback");
            Ok(())
        });
    }
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(20), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert_eq!(*order.borrow(), vec!["callback", "timer"]);
}

#[test]
fn exception_scope_catches_deferred_callback_error() {
    let reactor = Reactor::new().unwrap();
    let caught = Rc::new(Cell::new(false));
    {
        let caught = caught.clone();
        let _scope = ExceptionStackContext::new(move |error| {
            assert!(matches!(error, Error::Value(_)));
            caught.set(true);
            true
        });
        reactor.add_callback(|| Err(Error::value("deferred failure")));
    }
    // The scope has exited, but the callback carries its snapshot.
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(10), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert!(caught.get());
}

#[test]
fn exception_scope_catches_timer_error() {
    let reactor = Reactor::new().unwrap();
    let caught = Rc::new(Cell::new(false));
    {
        let caught = caught.clone();
        let _scope = ExceptionStackContext::new(move |_| {
            caught.set(true);
            true
        });
        reactor.add_timeout(Duration::from_millis(1), || {
            Err(Error::value("timer failure"))
        });
    }
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(20), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert!(caught.get());
}

#[test]
fn null_context_escapes_enclosing_scope() {
    let reactor = Reactor::new().unwrap();
    let caught = Rc::new(Cell::new(false));
    {
        let caught = caught.clone();
        let _scope = ExceptionStackContext::new(move |_| {
            caught.set(true);
            true
        });
        let _null = NullContext::new();
        // Registered under an empty handler stack; the error is only
        // logged, never delivered to the scope above.
        reactor.add_callback(|| Err(Error::value("escapes")));
    }
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(10), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert!(!caught.get());
}

#[test]
fn remote_callback_wakes_idle_loop() {
    let reactor = Reactor::new().unwrap();
    let waker = reactor.waker();
    let hit = Rc::new(Cell::new(false));
    let r = reactor.clone();
    let hit2 = hit.clone();
    // Nothing else is scheduled; only the remote post can wake the loop.
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        waker.add_callback(|| Ok(()));
    });
    reactor.add_callback(move || {
        // Runs first; the loop then parks until the remote callback lands.
        r.add_timeout(Duration::from_millis(60), move || {
            hit2.set(true);
            Ok(())
        });
        Ok(())
    });
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(100), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert!(hit.get());
}

#[test]
fn periodic_callback_stops_cleanly() {
    let reactor = Reactor::new().unwrap();
    let count = Rc::new(Cell::new(0u32));
    let periodic = {
        let count = count.clone();
        PeriodicCallback::new(Duration::from_millis(3), move || {
            count.set(count.get() + 1);
            Ok(())
        })
    };
    periodic.start(&reactor);
    {
        let periodic_count = count.clone();
        let r = reactor.clone();
        reactor.add_timeout(Duration::from_millis(30), move || {
            assert!(periodic_count.get() >= 2);
            r.stop();
            Ok(())
        });
    }
    reactor.start();
    periodic.stop();
    let frozen = count.get();
    // A second run with the periodic stopped must not tick again.
    let r = reactor.clone();
    reactor.add_timeout(Duration::from_millis(15), move || {
        r.stop();
        Ok(())
    });
    reactor.start();
    assert_eq!(count.get(), frozen);
}

#[test]
fn run_sync_interleaves_with_spawned_tasks() -> Result<()> {
    let reactor = Reactor::new().unwrap();
    let progressed = Rc::new(Cell::new(false));
    {
        let progressed = progressed.clone();
        reactor.spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            progressed.set(true);
        });
    }
    let out = reactor.run_sync(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        7
    });
    assert_eq!(out, 7);
    assert!(progressed.get());
    Ok(())
}
