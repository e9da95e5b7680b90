/*
 * reactor.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Squall, an asynchronous web server and client library.
 *
 * Squall is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Squall is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Squall.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Single-threaded event loop: zero-delay callbacks in FIFO order, a timer
//! heap with insertion-order ties, signal handlers, and a cross-thread waker.
//!
//! The loop is a tokio current-thread runtime plus a LocalSet; protocol code
//! runs as local tasks while a resident scheduler task services the callback
//! queue and timer heap. Callbacks and timers are registered with the
//! StackContext snapshot active at registration, so errors they raise land in
//! the handlers that were in scope when they were scheduled.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::stack_context::{self, ContextState};

type CallbackFn = Box<dyn FnOnce() -> Result<()>>;
type RemoteCallbackFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Identity of a scheduled timeout; valid for `remove_timeout` even after
/// the timer has fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(u64);

struct QueuedCallback {
    state: ContextState,
    callback: CallbackFn,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: u64,
    state: ContextState,
    callback: CallbackFn,
}

// Min-heap on (deadline, seq): earlier deadlines first, insertion order
// breaking ties.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

struct ReactorState {
    callbacks: RefCell<VecDeque<QueuedCallback>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    live_timers: RefCell<HashSet<u64>>,
    cancelled_timers: RefCell<HashSet<u64>>,
    next_id: Cell<u64>,
    notify: Notify,
    stop_notify: Notify,
    stop_requested: Cell<bool>,
    running: Cell<bool>,
    remote_tx: UnboundedSender<RemoteCallbackFn>,
    #[cfg(unix)]
    signal_tasks: RefCell<HashMap<i32, tokio::task::JoinHandle<()>>>,
}

impl ReactorState {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn request_stop(&self) {
        self.stop_requested.set(true);
        self.stop_notify.notify_one();
        self.notify.notify_one();
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Weak<ReactorState>>> = const { RefCell::new(None) };
}

/// Called by the StackContext dispatcher when a callback raises the
/// system-exit sentinel: break the running loop instead of logging.
pub(crate) fn request_exit() {
    CURRENT.with(|c| {
        if let Some(state) = c.borrow().as_ref().and_then(Weak::upgrade) {
            log::error!("system exit requested, stopping reactor");
            state.request_stop();
        }
    });
}

// Field order matters: the LocalSet (and the I/O resources its tasks own)
// must drop before the runtime that drives them.
struct ReactorInner {
    local: LocalSet,
    rt: tokio::runtime::Runtime,
    state: Rc<ReactorState>,
}

/// The event loop. One per thread; cheap to clone (shared handle).
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<ReactorInner>,
}

/// Send handle for posting callbacks into the loop from other threads.
#[derive(Clone)]
pub struct ReactorWaker {
    tx: UnboundedSender<RemoteCallbackFn>,
}

impl ReactorWaker {
    /// Enqueue a callback and wake the loop. The callback runs on the
    /// reactor thread in arrival order.
    pub fn add_callback(&self, callback: impl FnOnce() -> Result<()> + Send + 'static) {
        // A send failure means the reactor is gone; nothing to run it on.
        let _ = self.tx.send(Box::new(callback));
    }
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (remote_tx, remote_rx) = unbounded_channel();
        let state = Rc::new(ReactorState {
            callbacks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BinaryHeap::new()),
            live_timers: RefCell::new(HashSet::new()),
            cancelled_timers: RefCell::new(HashSet::new()),
            next_id: Cell::new(1),
            notify: Notify::new(),
            stop_notify: Notify::new(),
            stop_requested: Cell::new(false),
            running: Cell::new(false),
            remote_tx,
            #[cfg(unix)]
            signal_tasks: RefCell::new(HashMap::new()),
        });
        let local = LocalSet::new();
        local.spawn_local(scheduler(state.clone(), remote_rx));
        CURRENT.with(|c| *c.borrow_mut() = Some(Rc::downgrade(&state)));
        Ok(Self {
            inner: Rc::new(ReactorInner { rt, local, state }),
        })
    }

    /// Enqueue a zero-delay callback; it runs before the next I/O poll, in
    /// FIFO order with other queued callbacks. The current StackContext is
    /// captured and restored around the call.
    pub fn add_callback(&self, callback: impl FnOnce() -> Result<()> + 'static) {
        let state = &self.inner.state;
        state.callbacks.borrow_mut().push_back(QueuedCallback {
            state: stack_context::snapshot(),
            callback: Box::new(callback),
        });
        state.notify.notify_one();
    }

    /// Handle for posting callbacks from other threads.
    pub fn waker(&self) -> ReactorWaker {
        ReactorWaker {
            tx: self.inner.state.remote_tx.clone(),
        }
    }

    /// Schedule `callback` after `delay`. Timers with equal deadlines fire
    /// in the order they were added. Returns a handle for cancellation.
    pub fn add_timeout(
        &self,
        delay: Duration,
        callback: impl FnOnce() -> Result<()> + 'static,
    ) -> TimeoutHandle {
        self.add_timeout_at(Instant::now() + delay, callback)
    }

    /// Schedule `callback` at an absolute (monotonic) deadline. A deadline
    /// in the past fires on the next loop turn.
    pub fn add_timeout_at(
        &self,
        deadline: Instant,
        callback: impl FnOnce() -> Result<()> + 'static,
    ) -> TimeoutHandle {
        let state = &self.inner.state;
        let id = state.next_id();
        let seq = state.next_id();
        state.live_timers.borrow_mut().insert(id);
        state.timers.borrow_mut().push(TimerEntry {
            deadline,
            seq,
            id,
            state: stack_context::snapshot(),
            callback: Box::new(callback),
        });
        state.notify.notify_one();
        TimeoutHandle(id)
    }

    /// Cancel a pending timeout. Idempotent; a no-op after the timer fired.
    pub fn remove_timeout(&self, handle: TimeoutHandle) {
        let state = &self.inner.state;
        if state.live_timers.borrow_mut().remove(&handle.0) {
            state.cancelled_timers.borrow_mut().insert(handle.0);
        }
    }

    /// Register a handler for a POSIX signal. The handler runs on the
    /// reactor thread; returning a negative value unregisters it. A second
    /// registration for the same signal replaces the first.
    #[cfg(unix)]
    pub fn add_signal_handler(
        &self,
        signum: i32,
        mut callback: impl FnMut() -> i32 + 'static,
    ) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};
        let kind = SignalKind::from_raw(signum);
        let handle = self.inner.local.spawn_local(async move {
            let mut sig = match signal(kind) {
                Ok(sig) => sig,
                Err(e) => {
                    log::error!("cannot install handler for signal {}: {}", signum, e);
                    return;
                }
            };
            while sig.recv().await.is_some() {
                if callback() < 0 {
                    break;
                }
            }
        });
        if let Some(old) = self
            .inner
            .state
            .signal_tasks
            .borrow_mut()
            .insert(signum, handle)
        {
            old.abort();
        }
        Ok(())
    }

    /// Unregister a signal handler installed with `add_signal_handler`.
    #[cfg(unix)]
    pub fn remove_signal_handler(&self, signum: i32) {
        if let Some(handle) = self.inner.state.signal_tasks.borrow_mut().remove(&signum) {
            handle.abort();
        }
    }

    /// Spawn a future onto the loop. It makes progress whenever the loop
    /// runs (`start` or `run_sync`).
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.inner.local.spawn_local(future);
    }

    pub fn running(&self) -> bool {
        self.inner.state.running.get()
    }

    /// Run the loop until `stop` is called. A `stop` issued before `start`
    /// makes this return immediately (the original consumed-stop contract).
    pub fn start(&self) {
        let state = &self.inner.state;
        if state.stop_requested.replace(false) {
            return;
        }
        state.running.set(true);
        CURRENT.with(|c| *c.borrow_mut() = Some(Rc::downgrade(state)));
        let stop = async {
            loop {
                state.stop_notify.notified().await;
                if state.stop_requested.replace(false) {
                    break;
                }
            }
        };
        self.inner.rt.block_on(self.inner.local.run_until(stop));
        state.running.set(false);
    }

    /// Request the loop to stop. Safe from callbacks and timers; if the loop
    /// is idle the request is remembered and the next `start` returns at once.
    pub fn stop(&self) {
        self.inner.state.request_stop();
    }

    /// Run the loop just long enough to drive `future` to completion and
    /// return its output. Queued callbacks, timers, and spawned tasks make
    /// progress while it is pending.
    pub fn run_sync<F: Future>(&self, future: F) -> F::Output {
        let state = &self.inner.state;
        state.running.set(true);
        CURRENT.with(|c| *c.borrow_mut() = Some(Rc::downgrade(state)));
        let out = self.inner.rt.block_on(self.inner.local.run_until(future));
        state.running.set(false);
        out
    }
}

/// Resident task: drains the callback queue, fires due timers, and pulls in
/// cross-thread callbacks, then parks until woken or the next deadline.
async fn scheduler(state: Rc<ReactorState>, mut remote_rx: UnboundedReceiver<RemoteCallbackFn>) {
    loop {
        while let Ok(cb) = remote_rx.try_recv() {
            state.callbacks.borrow_mut().push_back(QueuedCallback {
                state: Vec::new(),
                callback: cb,
            });
        }

        loop {
            let next = state.callbacks.borrow_mut().pop_front();
            match next {
                Some(qc) => {
                    let cb = qc.callback;
                    stack_context::run_with_state(&qc.state, move || cb());
                }
                None => break,
            }
        }

        let now = Instant::now();
        loop {
            let due = {
                let mut timers = state.timers.borrow_mut();
                match timers.peek() {
                    Some(entry) if entry.deadline <= now => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = due else { break };
            if state.cancelled_timers.borrow_mut().remove(&entry.id) {
                continue;
            }
            state.live_timers.borrow_mut().remove(&entry.id);
            let cb = entry.callback;
            stack_context::run_with_state(&entry.state, move || cb());
        }

        if !state.callbacks.borrow().is_empty() {
            continue;
        }

        let next_deadline = state.timers.borrow().peek().map(|e| e.deadline);
        tokio::select! {
            _ = state.notify.notified() => {}
            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
            received = remote_rx.recv() => {
                if let Some(cb) = received {
                    state.callbacks.borrow_mut().push_back(QueuedCallback {
                        state: Vec::new(),
                        callback: cb,
                    });
                }
            }
        }
    }
}

/// Repeating timer: runs `callback` every `interval` until stopped. Errors
/// are logged and do not cancel the cycle; the system-exit sentinel stops
/// the loop through the usual path.
pub struct PeriodicCallback {
    inner: Rc<PeriodicInner>,
}

struct PeriodicInner {
    callback: RefCell<Box<dyn FnMut() -> Result<()>>>,
    interval: Duration,
    running: Cell<bool>,
}

impl PeriodicCallback {
    pub fn new(interval: Duration, callback: impl FnMut() -> Result<()> + 'static) -> Self {
        Self {
            inner: Rc::new(PeriodicInner {
                callback: RefCell::new(Box::new(callback)),
                interval,
                running: Cell::new(false),
            }),
        }
    }

    pub fn start(&self, reactor: &Reactor) {
        if self.inner.running.replace(true) {
            return;
        }
        Self::schedule(self.inner.clone(), reactor.clone());
    }

    pub fn stop(&self) {
        self.inner.running.set(false);
    }

    fn schedule(inner: Rc<PeriodicInner>, reactor: Reactor) {
        let interval = inner.interval;
        reactor.clone().add_timeout(interval, move || {
            if !inner.running.get() {
                return Ok(());
            }
            match (inner.callback.borrow_mut())() {
                Ok(()) => {}
                Err(Error::SystemExit) => return Err(Error::SystemExit),
                Err(e) => log::error!("Error in periodic callback: {}", e),
            }
            if inner.running.get() {
                Self::schedule(inner, reactor);
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn callbacks_run_in_fifo_order() {
        let reactor = Reactor::new().unwrap();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            reactor.add_callback(move || {
                order.borrow_mut().push(i);
                Ok(())
            });
        }
        let r = reactor.clone();
        let order2 = order.clone();
        reactor.add_callback(move || {
            // Runs after the five above; everything observed in order.
            assert_eq!(*order2.borrow(), vec![0, 1, 2, 3, 4]);
            r.stop();
            Ok(())
        });
        reactor.start();
        assert_eq!(order.borrow().len(), 5);
    }

    #[test]
    fn equal_deadline_timers_fire_in_insertion_order() {
        let reactor = Reactor::new().unwrap();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let deadline = Instant::now() + Duration::from_millis(10);
        for i in 0..3 {
            let order = order.clone();
            reactor.add_timeout_at(deadline, move || {
                order.borrow_mut().push(i);
                Ok(())
            });
        }
        let r = reactor.clone();
        reactor.add_timeout_at(deadline, move || {
            r.stop();
            Ok(())
        });
        reactor.start();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn removed_timeout_does_not_fire() {
        let reactor = Reactor::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let handle = {
            let fired = fired.clone();
            reactor.add_timeout(Duration::from_millis(5), move || {
                fired.set(true);
                Ok(())
            })
        };
        reactor.remove_timeout(handle);
        // Removing twice is harmless.
        reactor.remove_timeout(handle);
        let r = reactor.clone();
        reactor.add_timeout(Duration::from_millis(20), move || {
            r.stop();
            Ok(())
        });
        reactor.start();
        assert!(!fired.get());
    }

    #[test]
    fn waker_posts_from_another_thread() {
        let reactor = Reactor::new().unwrap();
        let waker = reactor.waker();
        let hit = Rc::new(Cell::new(false));
        {
            let hit = hit.clone();
            let r = reactor.clone();
            reactor.add_callback(move || {
                // Keep the loop alive until the remote callback lands.
                let handle = std::thread::spawn(move || {
                    waker.add_callback(|| Ok(()));
                });
                handle.join().ok();
                r.add_timeout(Duration::from_millis(30), move || {
                    hit.set(true);
                    Ok(())
                });
                Ok(())
            });
        }
        let r = reactor.clone();
        reactor.add_timeout(Duration::from_millis(60), move || {
            r.stop();
            Ok(())
        });
        reactor.start();
        assert!(hit.get());
    }

    #[test]
    fn run_sync_drives_future_to_completion() {
        let reactor = Reactor::new().unwrap();
        let value = reactor.run_sync(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            42
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn callback_error_is_logged_not_fatal() {
        let reactor = Reactor::new().unwrap();
        reactor.add_callback(|| Err(Error::value("whoops")));
        let hit = Rc::new(Cell::new(false));
        let r = reactor.clone();
        let hit2 = hit.clone();
        reactor.add_callback(move || {
            hit2.set(true);
            r.stop();
            Ok(())
        });
        reactor.start();
        assert!(hit.get());
    }

    #[test]
    fn system_exit_breaks_the_loop() {
        let reactor = Reactor::new().unwrap();
        reactor.add_callback(|| Err(Error::SystemExit));
        let later = Rc::new(Cell::new(false));
        {
            let later = later.clone();
            reactor.add_timeout(Duration::from_secs(30), move || {
                later.set(true);
                Ok(())
            });
        }
        reactor.start();
        assert!(!later.get());
    }

    #[test]
    fn periodic_callback_repeats_until_stopped() {
        let reactor = Reactor::new().unwrap();
        let count = Rc::new(Cell::new(0u32));
        let periodic = {
            let count = count.clone();
            PeriodicCallback::new(Duration::from_millis(5), move || {
                count.set(count.get() + 1);
                Ok(())
            })
        };
        periodic.start(&reactor);
        let r = reactor.clone();
        reactor.add_timeout(Duration::from_millis(40), move || {
            r.stop();
            Ok(())
        });
        reactor.start();
        periodic.stop();
        assert!(count.get() >= 3);
    }
}
